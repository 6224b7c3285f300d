use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::hooks::{Hooks, InventoryProbe};
use crate::engine::plan::{
    RunPlan, ThinkTime, DEFAULT_GRACEFUL_STOP, DEFAULT_REQUEST_TIMEOUT, DEFAULT_THRESHOLD_INTERVAL,
    DEFAULT_TICK,
};
use crate::engine::scenario::{Scenario, DEFAULT_CACHE_HIT_THRESHOLD};
use crate::engine::schedule::{Schedule, Stage};
use crate::engine::workload::{IdRange, Pareto, UniformJitter, Workload};
use crate::error::ConfigError;
use crate::stats::ThresholdSpec;
use crate::utils::{parse_duration, parse_duration_or};

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct StageConfig {
    /// Stage length (e.g. "15s", "1m")
    pub duration: String,
    /// VU count to reach by the end of the stage
    pub target: i64,
}

/// User identity policy for the coupon scenario:
/// `(vu % base_modulo) + 1 + rand(0..=jitter_max) * multiplier`
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct UserIdConfig {
    pub base_modulo: Option<u64>,
    pub jitter_max: Option<u64>,
    pub multiplier: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScenarioConfig {
    /// POST /coupons/{coupon_id}/issue
    CouponIssue {
        #[serde(default, alias = "couponId")]
        coupon_id: Option<u64>,
        #[serde(default)]
        user_id: Option<UserIdConfig>,
    },
    /// GET /products/{id} with a hot/cold id split
    PopularProducts {
        #[serde(default)]
        hot: Option<IdRange>,
        #[serde(default)]
        cold: Option<IdRange>,
        #[serde(default)]
        hot_probability: Option<f64>,
        /// Latency under which a response counts as an estimated cache hit
        #[serde(default)]
        cache_hit_threshold: Option<String>,
    },
}

/// A threshold expression, either bare (`"p(95)<300"`) or with a description.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum ThresholdConfig {
    Expression(String),
    Described {
        threshold: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ThresholdConfig {
    fn to_spec(&self, metric: &str) -> Result<ThresholdSpec, ConfigError> {
        match self {
            ThresholdConfig::Expression(expression) => ThresholdSpec::parse(metric, expression),
            ThresholdConfig::Described {
                threshold,
                description,
            } => {
                let spec = ThresholdSpec::parse(metric, threshold)?;
                Ok(match description {
                    Some(d) => spec.with_description(d.clone()),
                    None => spec,
                })
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ThinkTimeConfig {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct InventoryConfig {
    /// Set to false to skip the before/after probe
    pub enabled: Option<bool>,
    /// Path under the base URL (default for coupons: /api/coupons/{coupon_id})
    pub path: Option<String>,
    /// Integer JSON field holding the quantity (default: quantity)
    pub field: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct Config {
    /// Target service root (e.g. "http://localhost:8080")
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Which built-in scenario to run
    pub scenario: Option<ScenarioConfig>,
    /// Ramping schedule (k6: stages)
    #[serde(alias = "schedule")]
    pub stages: Option<Vec<StageConfig>>,
    /// Pass/Fail criteria, metric name to k6-style expressions
    #[serde(alias = "criteria")]
    pub thresholds: Option<BTreeMap<String, Vec<ThresholdConfig>>>,
    /// Uniform pause between iterations
    #[serde(alias = "thinkTime")]
    pub think_time: Option<ThinkTimeConfig>,
    /// Per-request timeout (default: 10s)
    #[serde(alias = "requestTimeout")]
    pub request_timeout: Option<String>,
    /// Scheduler reconciliation period (default: 100ms)
    pub tick: Option<String>,
    /// Graceful shutdown wait time (default: 30s)
    pub stop: Option<String>,
    /// Fixed number of iterations per VU
    pub iterations: Option<u64>,
    /// Abort the test as soon as a threshold fails during periodic evaluation
    #[serde(alias = "abortOnFail")]
    pub abort_on_fail: Option<bool>,
    /// Schedule time before the first early-abort check (default: end of the first stage)
    #[serde(alias = "abortDelay")]
    pub abort_delay: Option<String>,
    /// How often thresholds are checked when abort_on_fail is set (default: 5s)
    #[serde(alias = "thresholdInterval")]
    pub threshold_interval: Option<String>,
    /// Path that must answer 200 before load starts; "" disables the scenario default
    #[serde(alias = "healthCheck")]
    pub health_check: Option<String>,
    /// Stock probe read before and after the run
    pub inventory: Option<InventoryConfig>,
    /// Target URL to warmup connections before starting
    pub warmup: Option<String>,
    /// Tags carried into the report
    pub tags: Option<BTreeMap<String, String>>,
}

/// Values supplied on the command line or through the environment; they win
/// over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub coupon_id: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.base_url {
            self.base_url = Some(url.clone());
        }
        if let Some(id) = overrides.coupon_id {
            match &mut self.scenario {
                Some(ScenarioConfig::CouponIssue { coupon_id, .. }) => *coupon_id = Some(id),
                // no scenario given: the coupon id implies the coupon scenario
                None => {
                    self.scenario = Some(ScenarioConfig::CouponIssue {
                        coupon_id: Some(id),
                        user_id: None,
                    })
                }
                Some(ScenarioConfig::PopularProducts { .. }) => {}
            }
        }
    }

    /// Validate everything and produce an immutable [`RunPlan`].
    pub fn resolve(&self) -> Result<RunPlan, ConfigError> {
        let base_url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing("base_url"))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: format!("'{}' must start with http:// or https://", base_url),
            });
        }

        let scenario_config = self.scenario.as_ref().ok_or(ConfigError::Missing("scenario"))?;
        let (scenario, workload, target_id) = build_scenario(scenario_config)?;

        let stages = match &self.stages {
            Some(stages) => resolve_stages(stages)?,
            None => scenario.default_stages(),
        };
        let schedule = Schedule::new(stages)?;

        let mut plan = RunPlan::new(base_url, scenario, workload, schedule);

        plan.thresholds = match &self.thresholds {
            Some(map) => {
                let mut specs = Vec::new();
                for (metric, entries) in map {
                    for entry in entries {
                        specs.push(entry.to_spec(metric)?);
                    }
                }
                specs
            }
            None => plan
                .scenario
                .default_thresholds()
                .iter()
                .map(|(metric, expression)| ThresholdSpec::parse(metric, expression))
                .collect::<Result<_, _>>()?,
        };
        plan.validate_thresholds()?;

        if let Some(tt) = &self.think_time {
            plan.think_time = ThinkTime::new(
                parse_duration("think_time.min", &tt.min)?,
                parse_duration("think_time.max", &tt.max)?,
            )?;
        }

        plan.request_timeout = non_zero(
            "request_timeout",
            parse_duration_or(
                "request_timeout",
                self.request_timeout.as_deref(),
                DEFAULT_REQUEST_TIMEOUT,
            )?,
        )?;
        plan.tick = non_zero(
            "tick",
            parse_duration_or("tick", self.tick.as_deref(), DEFAULT_TICK)?,
        )?;
        plan.graceful_stop =
            parse_duration_or("stop", self.stop.as_deref(), DEFAULT_GRACEFUL_STOP)?;
        plan.threshold_interval = non_zero(
            "threshold_interval",
            parse_duration_or(
                "threshold_interval",
                self.threshold_interval.as_deref(),
                DEFAULT_THRESHOLD_INTERVAL,
            )?,
        )?;

        if self.iterations == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        plan.iterations = self.iterations;
        plan.abort_on_fail = self.abort_on_fail.unwrap_or(false);
        plan.abort_delay = self
            .abort_delay
            .as_deref()
            .map(|v| parse_duration("abort_delay", v))
            .transpose()?;

        plan.hooks = Hooks {
            health_check: match &self.health_check {
                Some(path) if path.trim().is_empty() => None,
                Some(path) => Some(path.clone()),
                None => plan.scenario.default_health_check().map(str::to_string),
            },
            warmup: self.warmup.clone(),
            inventory: self.resolve_inventory(&plan.scenario, target_id),
        };

        plan.tags
            .insert("environment".to_string(), "loadtest".to_string());
        if let Some(tags) = &self.tags {
            plan.tags
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(plan)
    }

    fn resolve_inventory(&self, scenario: &Scenario, target_id: u64) -> Option<InventoryProbe> {
        let config = self.inventory.clone().unwrap_or_default();
        if config.enabled == Some(false) {
            return None;
        }
        let path = config
            .path
            .or_else(|| scenario.default_inventory_path(target_id))?;
        Some(InventoryProbe {
            path,
            field: config.field.unwrap_or_else(|| "quantity".to_string()),
        })
    }
}

fn non_zero(field: &'static str, d: Duration) -> Result<Duration, ConfigError> {
    if d.is_zero() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(d)
}

fn resolve_stages(stages: &[StageConfig]) -> Result<Vec<Stage>, ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::InvalidStages(
            "at least one stage is required".to_string(),
        ));
    }
    stages
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let duration = parse_duration(&format!("stages[{}].duration", i), &s.duration)?;
            let target = usize::try_from(s.target).map_err(|_| {
                ConfigError::InvalidStages(format!(
                    "stages[{}].target must not be negative (got {})",
                    i, s.target
                ))
            })?;
            Ok(Stage::new(duration, target))
        })
        .collect()
}

fn build_scenario(
    config: &ScenarioConfig,
) -> Result<(Scenario, Arc<dyn Workload>, u64), ConfigError> {
    match config {
        ScenarioConfig::CouponIssue { coupon_id, user_id } => {
            let coupon_id = coupon_id.unwrap_or(1);
            let mut workload = UniformJitter::new(coupon_id);
            if let Some(u) = user_id {
                workload.base_modulo = u.base_modulo.unwrap_or(workload.base_modulo);
                workload.jitter_max = u.jitter_max.unwrap_or(workload.jitter_max);
                workload.multiplier = u.multiplier.unwrap_or(workload.multiplier);
            }
            workload.validate()?;
            Ok((Scenario::CouponIssue, Arc::new(workload), coupon_id))
        }
        ScenarioConfig::PopularProducts {
            hot,
            cold,
            hot_probability,
            cache_hit_threshold,
        } => {
            let defaults = Pareto::default();
            let workload = Pareto {
                hot: hot.unwrap_or(defaults.hot),
                cold: cold.unwrap_or(defaults.cold),
                hot_probability: hot_probability.unwrap_or(defaults.hot_probability),
            };
            workload.validate()?;
            let cache_hit_threshold = parse_duration_or(
                "scenario.cache_hit_threshold",
                cache_hit_threshold.as_deref(),
                DEFAULT_CACHE_HIT_THRESHOLD,
            )?;
            Ok((
                Scenario::PopularProducts {
                    cache_hit_threshold,
                },
                Arc::new(workload),
                0,
            ))
        }
    }
}
