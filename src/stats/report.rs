use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use super::sink::MetricsSnapshot;
use super::threshold::{ThresholdResult, Verdict};

/// Inventory quantity read before and after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDiff {
    pub before: i64,
    pub after: i64,
    pub consumed: i64,
}

impl InventoryDiff {
    pub fn new(before: i64, after: i64) -> Self {
        Self {
            before,
            after,
            consumed: before - after,
        }
    }
}

/// Run facts the engine knows and the sink does not.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub scenario: String,
    pub tags: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub run_duration: Duration,
    pub peak_vus: usize,
    /// Outcome category names, in display order.
    pub categories: Vec<String>,
    pub inventory: Option<InventoryDiff>,
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub scenario: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub started_at: String,
    pub run_duration_ms: u64,
    pub peak_vus: usize,
    pub iterations: u64,
    pub outcomes: BTreeMap<String, u64>,
    pub metrics: MetricsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
    pub passed: bool,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryDiff>,
}

impl Report {
    pub fn build(info: RunInfo, metrics: MetricsSnapshot, verdict: Verdict) -> Self {
        let outcomes = info
            .categories
            .iter()
            .map(|c| (c.clone(), metrics.counter(&format!("{}_total", c))))
            .collect();
        Report {
            scenario: info.scenario,
            tags: info.tags,
            started_at: info.started_at.to_rfc3339(),
            run_duration_ms: info.run_duration.as_millis() as u64,
            peak_vus: info.peak_vus,
            iterations: metrics.counter("iterations"),
            outcomes,
            metrics,
            thresholds: verdict.results,
            passed: verdict.passed,
            aborted: info.aborted,
            inventory: info.inventory,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "\n--- Test Summary: {} ---", self.scenario)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            writeln!(out, "Tags:           {}", tags.join(", "))?;
        }
        writeln!(out, "Started:        {}", self.started_at)?;
        writeln!(
            out,
            "Duration:       {:?}",
            Duration::from_millis(self.run_duration_ms)
        )?;
        writeln!(out, "Peak VUs:       {}", self.peak_vus)?;
        writeln!(out, "Iterations:     {}", self.iterations)?;
        if self.aborted {
            writeln!(out, "Run aborted early.")?;
        }

        let reqs = self.metrics.counter("http_reqs");
        if reqs > 0 {
            writeln!(out, "Total Requests: {}", reqs)?;
            if let Some(t) = self.metrics.trends.get("http_req_duration") {
                writeln!(out, "Avg Latency:    {:.2}ms", t.avg)?;
                writeln!(out, "Min Latency:    {:.2}ms", t.min)?;
                writeln!(out, "Max Latency:    {:.2}ms", t.max)?;
                writeln!(out, "P50 Latency:    {:.2}ms", t.med)?;
                writeln!(out, "P90 Latency:    {:.2}ms", t.p90)?;
                writeln!(out, "P95 Latency:    {:.2}ms", t.p95)?;
                writeln!(out, "P99 Latency:    {:.2}ms", t.p99)?;
            }
        } else {
            writeln!(out, "No requests completed.")?;
        }

        if !self.outcomes.is_empty() {
            writeln!(out, "\nOutcomes:")?;
            for (name, count) in &self.outcomes {
                writeln!(out, "  {}: {}", name, count)?;
            }
        }

        let trends: Vec<_> = self
            .metrics
            .trends
            .iter()
            .filter(|(name, _)| name.as_str() != "http_req_duration")
            .collect();
        if !trends.is_empty() {
            writeln!(out, "\nTrends:")?;
            for (name, t) in trends {
                writeln!(
                    out,
                    "  {}: avg={:.2}ms, p95={:.2}ms, p99={:.2}ms, count={}",
                    name, t.avg, t.p95, t.p99, t.count
                )?;
            }
        }

        if !self.metrics.rates.is_empty() {
            writeln!(out, "\nRates:")?;
            for (name, r) in &self.metrics.rates {
                writeln!(
                    out,
                    "  {}: {:.2}% ({}/{})",
                    name,
                    r.rate * 100.0,
                    r.hits,
                    r.total
                )?;
            }
        }

        if let Some(inv) = &self.inventory {
            writeln!(out, "\nInventory:")?;
            writeln!(out, "  before:   {}", inv.before)?;
            writeln!(out, "  after:    {}", inv.after)?;
            writeln!(out, "  consumed: {}", inv.consumed)?;
        }

        if !self.thresholds.is_empty() {
            writeln!(out, "\nThresholds:")?;
            for t in &self.thresholds {
                let mark = if t.passed { "✓" } else { "✗" };
                let observed = t
                    .observed
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "n/a".to_string());
                writeln!(
                    out,
                    "  {} {}: {} (actual: {})",
                    mark, t.metric, t.expression, observed
                )?;
                if let Some(description) = &t.description {
                    writeln!(out, "      {}", description)?;
                }
            }
        }

        writeln!(
            out,
            "\nResult: {}",
            if self.passed { "PASSED" } else { "FAILED" }
        )?;
        writeln!(out, "--------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::sink::MetricSink;
    use crate::stats::threshold::{evaluate, ThresholdSpec};

    fn sample() -> Report {
        let sink = MetricSink::builder()
            .counter("http_reqs")
            .counter("iterations")
            .counter("queued_total")
            .counter("sold_out_total")
            .rate("errors")
            .trend("http_req_duration")
            .trend("api_response_time")
            .build();
        for _ in 0..3 {
            sink.counter("http_reqs").unwrap().add(1);
            sink.counter("iterations").unwrap().add(1);
            sink.counter("queued_total").unwrap().add(1);
            sink.rate("errors").unwrap().add(false);
            sink.trend("http_req_duration")
                .unwrap()
                .add(Duration::from_millis(20));
            sink.trend("api_response_time")
                .unwrap()
                .add(Duration::from_millis(20));
        }
        let snapshot = sink.snapshot();
        let specs = vec![ThresholdSpec::parse("errors", "rate<0.10")
            .unwrap()
            .with_description("fewer than one in ten issue attempts fail")];
        let verdict = evaluate(&specs, &snapshot, Duration::from_secs(3));
        let info = RunInfo {
            scenario: "coupon-issue".to_string(),
            tags: BTreeMap::from([("environment".to_string(), "loadtest".to_string())]),
            started_at: Utc::now(),
            run_duration: Duration::from_secs(3),
            peak_vus: 2,
            categories: vec!["queued".to_string(), "sold_out".to_string()],
            inventory: Some(InventoryDiff::new(100, 97)),
            aborted: false,
        };
        Report::build(info, snapshot, verdict)
    }

    #[test]
    fn test_build_collects_outcomes() {
        let report = sample();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.outcomes["queued"], 3);
        assert_eq!(report.outcomes["sold_out"], 0);
        assert!(report.passed);
        assert_eq!(report.inventory.unwrap().consumed, 3);
    }

    #[test]
    fn test_text_summary() {
        let text = sample().to_text();
        assert!(text.contains("--- Test Summary: coupon-issue ---"));
        assert!(text.contains("Total Requests: 3"));
        assert!(text.contains("✓ errors: rate<0.10"));
        assert!(text.contains("      fewer than one in ten issue attempts fail"));
        assert!(text.contains("consumed: 3"));
        assert!(text.contains("Result: PASSED"));
    }

    #[test]
    fn test_json_round_trip() {
        let report = sample();
        let parsed: Report = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(parsed.iterations, 3);
        assert_eq!(parsed.tags["environment"], "loadtest");
        assert_eq!(parsed.metrics.trends["http_req_duration"].avg, 20.0);
    }
}
