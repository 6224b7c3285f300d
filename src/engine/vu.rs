//! Virtual user task loop and the pool the scheduler resizes.
//!
//! Each VU is one tokio task running iterations sequentially:
//! params, request, classify and record, think time. Stopping is
//! cooperative. A VU checks its token at the top of every iteration and
//! wakes from think time as soon as the token fires, but never abandons a
//! request already in flight.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::classify::Classifier;
use super::control::ControlState;
use super::http_client::Transport;
use super::plan::RunPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

/// Lock-free cell holding a [`VuState`].
#[derive(Debug, Clone)]
pub struct SharedVuState(Arc<AtomicU8>);

impl SharedVuState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(VuState::Idle as u8)))
    }

    fn set(&self, state: VuState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> VuState {
        match self.0.load(Ordering::Acquire) {
            0 => VuState::Idle,
            1 => VuState::Running,
            _ => VuState::Stopped,
        }
    }
}

/// Everything a VU task needs, shared by all of them.
pub struct VuContext {
    pub plan: Arc<RunPlan>,
    pub transport: Arc<dyn Transport>,
    pub classifier: Arc<Classifier>,
    pub control: Arc<ControlState>,
}

pub struct VirtualUser {
    pub id: u64,
    state: SharedVuState,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    pub fn state(&self) -> VuState {
        self.state.get()
    }
}

/// Roughly 1% of iterations get a debug line.
const DEBUG_SAMPLE_PERCENT: u32 = 1;

pub async fn vu_loop(
    id: u64,
    ctx: Arc<VuContext>,
    state: SharedVuState,
    stop: CancellationToken,
) {
    state.set(VuState::Running);
    let mut rng = StdRng::from_entropy();
    let mut completed: u64 = 0;
    let plan = &ctx.plan;

    loop {
        if ctx.control.is_paused() {
            tokio::select! {
                _ = ctx.control.wait_while_paused() => {}
                _ = stop.cancelled() => break,
            }
        }
        if stop.is_cancelled() {
            break;
        }

        let params = plan.workload.next(id, &mut rng);
        let request = plan.scenario.build_request(&plan.base_url, &params);
        let result = ctx.transport.send(request, plan.request_timeout).await;

        // no await between classify and record
        let category = ctx.classifier.classify(&result, &params);
        ctx.classifier.record(category, &result);
        completed += 1;

        if rng.gen_ratio(DEBUG_SAMPLE_PERCENT, 100) {
            match &result {
                Ok(r) => debug!(
                    vu = id,
                    target = params.target_id,
                    user = ?params.user_id,
                    status = r.status,
                    latency_ms = r.latency.as_millis() as u64,
                    outcome = category.name(),
                    "iteration"
                ),
                Err(e) => debug!(vu = id, target = params.target_id, error = %e, "iteration"),
            }
        }

        if plan.iterations.is_some_and(|limit| completed >= limit) {
            break;
        }

        let pause = plan.think_time.sample(&mut rng);
        if !pause.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = stop.cancelled() => break,
            }
        }
    }

    state.set(VuState::Stopped);
}

/// The set of VUs owned by the scheduler.
///
/// `active` holds VUs that count toward the target, including ones that
/// retired themselves after their iteration limit. VUs told to stop move to
/// `draining` until their task ends.
pub struct VuPool {
    ctx: Arc<VuContext>,
    run_token: CancellationToken,
    tracker: TaskTracker,
    active: Vec<VirtualUser>,
    draining: Vec<VirtualUser>,
    next_id: u64,
}

impl VuPool {
    pub fn new(ctx: Arc<VuContext>, run_token: CancellationToken) -> Self {
        Self {
            ctx,
            run_token,
            tracker: TaskTracker::new(),
            active: Vec::new(),
            draining: Vec::new(),
            next_id: 1,
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let state = SharedVuState::new();
        let stop = self.run_token.child_token();
        let handle = self.tracker.spawn(vu_loop(
            id,
            self.ctx.clone(),
            state.clone(),
            stop.clone(),
        ));
        self.active.push(VirtualUser {
            id,
            state,
            stop,
            handle,
        });
    }

    /// Spawn or stop VUs until `live() == target`. Stops the most recently
    /// spawned first.
    pub fn scale_to(&mut self, target: usize) {
        while self.active.len() < target {
            self.spawn();
        }
        while self.active.len() > target {
            if let Some(vu) = self.active.pop() {
                vu.stop.cancel();
                self.draining.push(vu);
            }
        }
    }

    /// Forget stopped VUs whose tasks have ended.
    pub fn reap(&mut self) {
        self.draining.retain(|vu| !vu.handle.is_finished());
    }

    /// VUs counting toward the current target.
    pub fn live(&self) -> usize {
        self.active.len()
    }

    /// VUs currently executing iterations.
    pub fn running(&self) -> usize {
        self.active
            .iter()
            .filter(|vu| vu.state() == VuState::Running)
            .count()
    }

    /// VUs told to stop that have not finished yet.
    pub fn draining(&self) -> usize {
        self.draining
            .iter()
            .filter(|vu| !vu.handle.is_finished())
            .count()
    }

    /// Stop every VU and wait up to `grace` for them to finish. Tasks still
    /// running afterwards are aborted; their in-flight iteration is never
    /// recorded. Returns the number of aborted VUs.
    pub async fn shutdown(mut self, grace: Duration) -> usize {
        self.scale_to(0);
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return 0;
        }

        let mut aborted = 0;
        for vu in self.draining.drain(..) {
            if !vu.handle.is_finished() {
                vu.handle.abort();
                aborted += 1;
            }
        }
        warn!(
            "{} VUs did not stop within {:?} and were aborted",
            aborted, grace
        );
        aborted
    }
}
