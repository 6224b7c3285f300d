use anyhow::{Context as _, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::classify::Classifier;
use crate::engine::control::{ControlCommand, ControlState};
use crate::engine::http_client::{HttpClient, Transport};
use crate::engine::plan::RunPlan;
use crate::engine::vu::{VuContext, VuPool};
use crate::stats::{evaluate, InventoryDiff, MetricSink, Report, RunInfo};

pub mod classify;
pub mod control;
pub mod hooks;
pub mod http_client;
pub mod plan;
pub mod scenario;
pub mod schedule;
pub mod vu;
pub mod workload;

/// Drives one run of a [`RunPlan`] to completion.
pub struct Engine {
    plan: Arc<RunPlan>,
    transport: Arc<dyn Transport>,
    sink: Arc<MetricSink>,
    control: Arc<ControlState>,
    cancel: CancellationToken,
    live_vus: AtomicUsize,
}

impl Engine {
    /// Engine with a pooled HTTP client sized for the plan's peak concurrency.
    pub fn new(plan: RunPlan) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let peak = plan.schedule.max_target().max(1);
        let client = HttpClient::with_pool_and_workers(peak, peak)?;
        Ok(Self::with_transport(plan, Arc::new(client)))
    }

    pub fn with_transport(plan: RunPlan, transport: Arc<dyn Transport>) -> Self {
        // ~100 writers per trend shard
        let shards = (plan.schedule.max_target() / 100).clamp(16, 256);
        let sink = Arc::new(plan.scenario.sink_builder().trend_shards(shards).build());
        Self {
            plan: Arc::new(plan),
            transport,
            sink,
            control: Arc::new(ControlState::new()),
            cancel: CancellationToken::new(),
            live_vus: AtomicUsize::new(0),
        }
    }

    /// Cancelling this token ends the run early; results so far are kept.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn control(&self) -> Arc<ControlState> {
        self.control.clone()
    }

    pub fn sink(&self) -> &Arc<MetricSink> {
        &self.sink
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// VUs counting toward the target as of the last scheduler tick.
    pub fn live_vus(&self) -> usize {
        self.live_vus.load(Ordering::Relaxed)
    }

    /// Setup hooks, the staged load itself, teardown probes, then
    /// threshold evaluation over the final snapshot.
    pub async fn run(
        &self,
        mut commands: Option<mpsc::UnboundedReceiver<ControlCommand>>,
    ) -> Result<Report> {
        let plan = &self.plan;
        let started_at = Utc::now();
        let classifier = Arc::new(
            Classifier::new(plan.scenario.clone(), &self.sink)
                .context("metric sink is missing scenario series")?,
        );

        if let Some(path) = &plan.hooks.health_check {
            hooks::health_check(
                self.transport.as_ref(),
                &plan.base_url,
                path,
                plan.request_timeout,
            )
            .await?;
        }
        if let Some(url) = &plan.hooks.warmup {
            hooks::warmup(self.transport.clone(), url, plan.request_timeout).await;
        }
        let inventory_before = self.probe_inventory("before").await;

        info!(
            scenario = plan.scenario.name(),
            base_url = %plan.base_url,
            stages = plan.schedule.stages().len(),
            duration = ?plan.schedule.total_duration(),
            peak_target = plan.schedule.max_target(),
            "starting run"
        );

        let ctx = Arc::new(VuContext {
            plan: plan.clone(),
            transport: self.transport.clone(),
            classifier,
            control: self.control.clone(),
        });
        let mut pool = VuPool::new(ctx, self.cancel.clone());

        let start = Instant::now();
        let mut ticker = tokio::time::interval(plan.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let abort_thresholds = plan.abort_thresholds();
        let abort_delay = plan.abort_delay();
        let mut last_threshold_check = Instant::now();
        let mut peak_vus = 0;
        let mut aborted = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut disconnected = false;
            if let Some(rx) = commands.as_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(cmd) => self.apply(cmd, &pool, start),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                    }
                }
            }
            if disconnected {
                commands = None;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let clock = start.elapsed().saturating_sub(self.control.total_paused());
            if plan.schedule.is_finished(clock) {
                break;
            }
            let target = self
                .control
                .target_override()
                .unwrap_or_else(|| plan.schedule.target_at(clock));

            pool.reap();
            pool.scale_to(target);
            self.live_vus.store(pool.live(), Ordering::Relaxed);
            peak_vus = peak_vus.max(pool.live());

            if plan.abort_on_fail
                && !abort_thresholds.is_empty()
                && clock >= abort_delay
                && last_threshold_check.elapsed() >= plan.threshold_interval
            {
                last_threshold_check = Instant::now();
                let verdict = evaluate(&abort_thresholds, &self.sink.snapshot(), clock);
                if !verdict.passed {
                    for failed in verdict.failures() {
                        warn!(
                            "threshold {}: {} failed (actual: {:?}), aborting run",
                            failed.metric, failed.expression, failed.observed
                        );
                    }
                    aborted = true;
                    self.cancel.cancel();
                    break;
                }
            }
        }

        if self.cancel.is_cancelled() {
            aborted = true;
            info!("run cancelled, stopping {} VUs", pool.live());
        } else {
            info!("schedule complete, stopping {} VUs", pool.live());
        }
        let killed = pool.shutdown(plan.graceful_stop).await;
        self.live_vus.store(0, Ordering::Relaxed);
        if killed > 0 {
            warn!("{} in-flight iterations discarded", killed);
        }

        let run_duration = start.elapsed();
        let active = run_duration.saturating_sub(self.control.total_paused());

        let inventory_after = self.probe_inventory("after").await;
        let inventory = match (inventory_before, inventory_after) {
            (Some(before), Some(after)) => Some(InventoryDiff::new(before, after)),
            _ => None,
        };

        let snapshot = self.sink.snapshot();
        let verdict = evaluate(&plan.thresholds, &snapshot, active);
        for failed in verdict.failures() {
            warn!(
                "threshold {}: {} failed (actual: {:?})",
                failed.metric, failed.expression, failed.observed
            );
        }
        info!(
            iterations = snapshot.counter("iterations"),
            peak_vus,
            passed = verdict.passed,
            "run finished in {:?}",
            run_duration
        );

        let info = RunInfo {
            scenario: plan.scenario.name().to_string(),
            tags: plan.tags.clone(),
            started_at,
            run_duration,
            peak_vus,
            categories: plan
                .scenario
                .categories()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            inventory,
            aborted,
        };
        Ok(Report::build(info, snapshot, verdict))
    }

    fn apply(&self, cmd: ControlCommand, pool: &VuPool, start: Instant) {
        match cmd {
            ControlCommand::Ramp(n) => {
                info!("ramping to {} VUs", n);
                self.control.set_target_override(n);
            }
            ControlCommand::Pause => {
                info!("pausing");
                self.control.pause();
            }
            ControlCommand::Resume => {
                info!("resuming");
                self.control.resume();
            }
            ControlCommand::Status => {
                info!(
                    live = pool.live(),
                    running = pool.running(),
                    draining = pool.draining(),
                    paused = self.control.is_paused(),
                    iterations = self.sink.snapshot().counter("iterations"),
                    "status after {:?}",
                    start.elapsed()
                );
            }
            ControlCommand::Stop => {
                info!("stop requested");
                self.cancel.cancel();
            }
        }
    }

    async fn probe_inventory(&self, when: &str) -> Option<i64> {
        let probe = self.plan.hooks.inventory.as_ref()?;
        match hooks::read_inventory(
            self.transport.as_ref(),
            &self.plan.base_url,
            probe,
            self.plan.request_timeout,
        )
        .await
        {
            Ok(quantity) => {
                info!("inventory {}: {}", when, quantity);
                Some(quantity)
            }
            Err(e) => {
                warn!("inventory probe {} run skipped: {:#}", when, e);
                None
            }
        }
    }
}
