//! Pass/fail criteria over a metrics snapshot.
//!
//! Expressions use the familiar k6 shape, with or without spaces:
//! `p(95)<300`, `p95 < 300`, `rate<0.10`, `count>100`, `avg<=200`, `max<1000`.
//! Trend values are compared in milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::sink::{MetricKind, MetricsSnapshot};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
}

impl Aggregate {
    fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let agg = match s {
            "avg" => Aggregate::Avg,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "med" => Aggregate::Med,
            "count" => Aggregate::Count,
            "rate" => Aggregate::Rate,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|r| r.strip_suffix(')'))
                    .or_else(|| s.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown aggregate `{}`", s))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile `{}`", s))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {} out of range 0..=100", p));
                }
                Aggregate::Percentile(p)
            }
        };
        Ok(agg)
    }

    /// Whether this aggregate can be computed for a series of `kind`.
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => !matches!(self, Aggregate::Rate),
            MetricKind::Rate => matches!(self, Aggregate::Rate),
            MetricKind::Counter => matches!(self, Aggregate::Count | Aggregate::Rate),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Percentile(p) => write!(f, "p({})", p),
            Aggregate::Avg => f.write_str("avg"),
            Aggregate::Min => f.write_str("min"),
            Aggregate::Max => f.write_str("max"),
            Aggregate::Med => f.write_str("med"),
            Aggregate::Count => f.write_str("count"),
            Aggregate::Rate => f.write_str("rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
        }
    }
}

/// A parsed `aggregate op bound` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub bound: f64,
}

impl FromStr for ThresholdExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op_start = s
            .find(['<', '>', '='])
            .ok_or_else(|| "missing comparison operator".to_string())?;
        let (lhs, rest) = s.split_at(op_start);

        let (comparison, rhs) = if let Some(r) = rest.strip_prefix("<=") {
            (Comparison::Le, r)
        } else if let Some(r) = rest.strip_prefix(">=") {
            (Comparison::Ge, r)
        } else if let Some(r) = rest.strip_prefix("==") {
            (Comparison::Eq, r)
        } else if let Some(r) = rest.strip_prefix('<') {
            (Comparison::Lt, r)
        } else if let Some(r) = rest.strip_prefix('>') {
            (Comparison::Gt, r)
        } else if let Some(r) = rest.strip_prefix('=') {
            (Comparison::Eq, r)
        } else {
            return Err("missing comparison operator".to_string());
        };

        let aggregate = Aggregate::parse(lhs)?;
        let bound: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| format!("invalid bound `{}`", rhs.trim()))?;
        if !bound.is_finite() {
            return Err(format!("bound `{}` is not finite", rhs.trim()));
        }

        Ok(ThresholdExpr {
            aggregate,
            comparison,
            bound,
        })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregate,
            self.comparison.as_str(),
            self.bound
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub metric: String,
    /// The expression as written in the configuration.
    pub expression: String,
    pub expr: ThresholdExpr,
    pub description: Option<String>,
}

impl ThresholdSpec {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let expr = expression
            .parse::<ThresholdExpr>()
            .map_err(|reason| ConfigError::InvalidThreshold {
                metric: metric.to_string(),
                expression: expression.to_string(),
                reason,
            })?;
        Ok(Self {
            metric: metric.to_string(),
            expression: expression.trim().to_string(),
            expr,
            description: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Rejects aggregates that make no sense for the metric's kind.
    pub fn check_kind(&self, kind: MetricKind) -> Result<(), ConfigError> {
        if self.expr.aggregate.applies_to(kind) {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold {
                metric: self.metric.clone(),
                expression: self.expression.clone(),
                reason: format!("`{}` is not valid for a {:?} metric", self.expr.aggregate, kind),
            })
        }
    }

    /// Whether only the complete run can decide this threshold. Counter
    /// throughput and counter lower bounds start low while VUs ramp up, so
    /// checking them mid-run would fail a healthy target.
    pub fn needs_full_run(&self, kind: MetricKind) -> bool {
        kind == MetricKind::Counter
            && (self.expr.aggregate == Aggregate::Rate
                || matches!(
                    self.expr.comparison,
                    Comparison::Gt | Comparison::Ge | Comparison::Eq
                ))
    }

    /// The observed value for this threshold, or `None` when the metric is
    /// absent from the snapshot or the aggregate does not apply.
    pub fn observe(&self, snapshot: &MetricsSnapshot, elapsed: Duration) -> Option<f64> {
        let name = self.metric.as_str();
        match snapshot.kind_of(name)? {
            MetricKind::Trend => {
                let t = snapshot.trends.get(name)?;
                Some(match self.expr.aggregate {
                    Aggregate::Percentile(p) => return t.percentile_ms(p),
                    Aggregate::Avg => t.avg,
                    Aggregate::Min => t.min,
                    Aggregate::Max => t.max,
                    Aggregate::Med => t.med,
                    Aggregate::Count => t.count as f64,
                    Aggregate::Rate => return None,
                })
            }
            MetricKind::Rate => match self.expr.aggregate {
                Aggregate::Rate => Some(snapshot.rate(name)),
                _ => None,
            },
            MetricKind::Counter => {
                let count = snapshot.counter(name) as f64;
                match self.expr.aggregate {
                    Aggregate::Count => Some(count),
                    Aggregate::Rate => {
                        let secs = elapsed.as_secs_f64();
                        Some(if secs > 0.0 { count / secs } else { 0.0 })
                    }
                    _ => None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl Verdict {
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Evaluate every threshold; the verdict passes only if all of them do.
/// A threshold whose value cannot be observed fails.
pub fn evaluate(specs: &[ThresholdSpec], snapshot: &MetricsSnapshot, elapsed: Duration) -> Verdict {
    let results: Vec<ThresholdResult> = specs
        .iter()
        .map(|spec| {
            let observed = spec.observe(snapshot, elapsed);
            let passed = observed
                .map(|v| spec.expr.comparison.holds(v, spec.expr.bound))
                .unwrap_or(false);
            ThresholdResult {
                metric: spec.metric.clone(),
                expression: spec.expression.clone(),
                observed,
                passed,
                description: spec.description.clone(),
            }
        })
        .collect();
    let passed = results.iter().all(|r| r.passed);
    Verdict { results, passed }
}
