use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// One segment of the concurrency timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Ordered, non-empty list of stages.
///
/// Concurrency ramps linearly from the previous stage's target (zero before
/// the first stage) to each stage's target over that stage's duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    stages: Vec<Stage>,
}

impl Schedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::InvalidStages(
                "at least one stage is required".to_string(),
            ));
        }
        if stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .is_none()
        {
            return Err(ConfigError::InvalidStages(
                "total stage duration is too large".to_string(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Target concurrency at `elapsed`, truncated toward zero.
    /// Returns 0 once the final stage has ended.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut active_time = Duration::ZERO;
        let mut prev_target = 0;
        for stage in &self.stages {
            // a zero-length stage never contains `elapsed`, so it acts as a step
            if elapsed < active_time + stage.duration {
                let progress = (elapsed - active_time).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - prev_target as f64;
                return (prev_target as f64 + diff * progress) as usize;
            }
            active_time += stage.duration;
            prev_target = stage.target;
        }
        0
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }
}
