use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Commands that can be sent to control a running load test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Override the scheduled VU target
    Ramp(usize),
    /// Pause all VUs (idle loop)
    Pause,
    /// Resume execution
    Resume,
    /// Log current status
    Status,
    /// Graceful stop
    Stop,
}

/// State shared between the scheduler and the VU loops.
pub struct ControlState {
    paused: AtomicBool,
    resumed: Notify,
    /// Manual target set by `ramp`, replacing the schedule while present.
    target_override: Mutex<Option<usize>>,
    total_paused_ms: AtomicU64,
    /// Millis since `reference_instant` when the pause started, 0 if not paused
    pause_started_ms: AtomicU64,
    reference_instant: Instant,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            resumed: Notify::new(),
            target_override: Mutex::new(None),
            total_paused_ms: AtomicU64::new(0),
            pause_started_ms: AtomicU64::new(0),
            reference_instant: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps a pause started at t=0 distinguishable from "not paused"
        self.reference_instant.elapsed().as_millis() as u64 + 1
    }

    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pause_started_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        let started = self.pause_started_ms.swap(0, Ordering::SeqCst);
        if started > 0 {
            let paused_dur = self.now_ms().saturating_sub(started);
            self.total_paused_ms.fetch_add(paused_dur, Ordering::SeqCst);
        }
        self.resumed.notify_waiters();
    }

    /// Returns total time spent paused (including current pause if active)
    pub fn total_paused(&self) -> Duration {
        let mut total = self.total_paused_ms.load(Ordering::SeqCst);
        if self.is_paused() {
            let started = self.pause_started_ms.load(Ordering::SeqCst);
            if started > 0 {
                total += self.now_ms().saturating_sub(started);
            }
        }
        Duration::from_millis(total)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Resolves once the run is not paused.
    pub async fn wait_while_paused(&self) {
        loop {
            let notified = self.resumed.notified();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }

    pub fn set_target_override(&self, target: usize) {
        *self.target_override.lock() = Some(target);
    }

    pub fn target_override(&self) -> Option<usize> {
        *self.target_override.lock()
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a control command from user input
pub fn parse_control_command(input: &str) -> Option<ControlCommand> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    if parts.is_empty() {
        return None;
    }

    match parts[0].to_lowercase().as_str() {
        "ramp" | "scale" => parts
            .get(1)?
            .parse::<usize>()
            .ok()
            .map(ControlCommand::Ramp),
        "pause" => Some(ControlCommand::Pause),
        "resume" | "unpause" => Some(ControlCommand::Resume),
        "status" | "stats" => Some(ControlCommand::Status),
        "stop" | "quit" | "exit" => Some(ControlCommand::Stop),
        _ => None,
    }
}
