use rand::{Rng, RngCore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::hooks::Hooks;
use super::scenario::Scenario;
use super::schedule::Schedule;
use super::workload::Workload;
use crate::error::ConfigError;
use crate::stats::ThresholdSpec;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(5);

/// Uniform pause between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidValue {
                field: "think_time",
                reason: format!("min {:?} is greater than max {:?}", min, max),
            });
        }
        Ok(Self { min, max })
    }

    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let nanos = rng.gen_range(self.min.as_nanos() as u64..=self.max.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

/// Fully validated, immutable description of one run.
#[derive(Clone)]
pub struct RunPlan {
    pub base_url: String,
    pub scenario: Scenario,
    pub workload: Arc<dyn Workload>,
    pub schedule: Schedule,
    pub thresholds: Vec<ThresholdSpec>,
    pub think_time: ThinkTime,
    pub request_timeout: Duration,
    /// Scheduler reconciliation period.
    pub tick: Duration,
    /// How long stopping VUs may take to finish before they are aborted.
    pub graceful_stop: Duration,
    /// Per-VU iteration limit; a VU retires itself once reached.
    pub iterations: Option<u64>,
    pub abort_on_fail: bool,
    /// Schedule time before the first early-abort check; `None` waits for
    /// the end of the first stage.
    pub abort_delay: Option<Duration>,
    pub threshold_interval: Duration,
    pub hooks: Hooks,
    pub tags: BTreeMap<String, String>,
}

impl fmt::Debug for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunPlan")
            .field("base_url", &self.base_url)
            .field("scenario", &self.scenario)
            .field("workload", &self.workload)
            .field("stages", &self.schedule.stages().len())
            .field("thresholds", &self.thresholds.len())
            .field("think_time", &self.think_time)
            .field("request_timeout", &self.request_timeout)
            .field("tick", &self.tick)
            .field("graceful_stop", &self.graceful_stop)
            .field("iterations", &self.iterations)
            .field("abort_on_fail", &self.abort_on_fail)
            .field("abort_delay", &self.abort_delay)
            .finish()
    }
}

impl RunPlan {
    /// A plan with the scenario's defaults for everything but the schedule.
    /// Thresholds start empty.
    pub fn new(
        base_url: impl Into<String>,
        scenario: Scenario,
        workload: Arc<dyn Workload>,
        schedule: Schedule,
    ) -> Self {
        let (min, max) = scenario.default_think_time();
        let mut tags = BTreeMap::new();
        tags.insert("test_scenario".to_string(), scenario.name().to_string());
        Self {
            base_url: base_url.into(),
            workload,
            schedule,
            thresholds: Vec::new(),
            think_time: ThinkTime { min, max },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tick: DEFAULT_TICK,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            iterations: None,
            abort_on_fail: false,
            abort_delay: None,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            hooks: Hooks::default(),
            tags,
            scenario,
        }
    }

    /// Schedule time at which early-abort checks begin.
    pub fn abort_delay(&self) -> Duration {
        self.abort_delay.unwrap_or_else(|| {
            self.schedule
                .stages()
                .first()
                .map(|stage| stage.duration)
                .unwrap_or_default()
        })
    }

    /// Thresholds that can be checked while the run is still going.
    pub fn abort_thresholds(&self) -> Vec<ThresholdSpec> {
        self.thresholds
            .iter()
            .filter(|spec| {
                self.scenario
                    .kind_of(&spec.metric)
                    .is_some_and(|kind| !spec.needs_full_run(kind))
            })
            .cloned()
            .collect()
    }

    /// Check every threshold against the scenario's metric catalog.
    pub fn validate_thresholds(&self) -> Result<(), ConfigError> {
        for spec in &self.thresholds {
            let kind = self
                .scenario
                .kind_of(&spec.metric)
                .ok_or_else(|| ConfigError::UnknownMetric(spec.metric.clone()))?;
            spec.check_kind(kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schedule::Stage;
    use crate::engine::workload::UniformJitter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_think_time_bounds() {
        let tt = ThinkTime::new(Duration::from_millis(500), Duration::from_secs(2)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let d = tt.sample(&mut rng);
            assert!(d >= tt.min && d <= tt.max);
        }
        assert_eq!(ThinkTime::none().sample(&mut rng), Duration::ZERO);
        assert!(ThinkTime::new(Duration::from_secs(2), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_threshold_validation_against_catalog() {
        let schedule = Schedule::new(vec![Stage::new(Duration::from_secs(1), 1)]).unwrap();
        let mut plan = RunPlan::new(
            "http://localhost:8080",
            Scenario::CouponIssue,
            Arc::new(UniformJitter::new(1)),
            schedule,
        );
        assert_eq!(plan.tags["test_scenario"], "coupon-issue");

        plan.thresholds = vec![ThresholdSpec::parse("queued_responses", "rate>0.5").unwrap()];
        assert!(plan.validate_thresholds().is_ok());

        plan.thresholds = vec![ThresholdSpec::parse("product_query_time", "p(95)<1").unwrap()];
        assert!(matches!(
            plan.validate_thresholds(),
            Err(ConfigError::UnknownMetric(_))
        ));

        plan.thresholds = [
            ("http_reqs", "rate>50"),
            ("http_reqs", "count>100"),
            ("http_reqs", "count<100000"),
            ("errors", "rate<0.1"),
            ("http_req_duration", "p(95)<300"),
        ]
        .iter()
        .map(|(metric, expression)| ThresholdSpec::parse(metric, expression).unwrap())
        .collect();
        let early: Vec<String> = plan
            .abort_thresholds()
            .iter()
            .map(|spec| format!("{}:{}", spec.metric, spec.expression))
            .collect();
        assert_eq!(
            early,
            vec!["http_reqs:count<100000", "errors:rate<0.1", "http_req_duration:p(95)<300"]
        );
        assert_eq!(plan.abort_delay(), Duration::from_secs(1));
        plan.abort_delay = Some(Duration::from_millis(250));
        assert_eq!(plan.abort_delay(), Duration::from_millis(250));

        plan.thresholds = vec![ThresholdSpec::parse("errors", "avg<1").unwrap()];
        assert!(matches!(
            plan.validate_thresholds(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }
}
