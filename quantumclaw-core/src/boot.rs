//! Staged bootstrap and degradation tracking for the agent daemon.
//!
//! The daemon starts its subsystems as an ordered sequence of [`BootStage`]s.
//! Each stage is either *fatal* (a failure aborts the whole process with an
//! operator-readable diagnosis) or *degradable* (a failure drops the stage to
//! a reduced-capability stub and raises [`BootContext::degradation_level`]
//! instead of aborting). Shutdown walks the same stages in reverse, giving
//! each one a bounded window to stop cleanly — the same pattern the daemon
//! uses around individual component shutdown in `daemon::process`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

/// Coarse health signal exposed to the dashboard and to `quantumclaw status`.
///
/// Higher is worse. The level only ever rises during a single boot; it can
/// fall back down when a degraded subsystem recovers (see
/// [`BootContext::recover`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DegradationLevel {
    /// Everything came up as configured.
    Full,
    /// One non-critical stage is running on its fallback path.
    Minor,
    /// Multiple stages degraded, or one important stage (memory, channels).
    Moderate,
    /// Core capability loss (e.g. no tools, no persistence).
    Severe,
    /// Chat-only: model router alone is confirmed working.
    Critical,
}

impl DegradationLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DegradationLevel::Full,
            1 => DegradationLevel::Minor,
            2 => DegradationLevel::Moderate,
            3 => DegradationLevel::Severe,
            _ => DegradationLevel::Critical,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DegradationLevel::Full => 0,
            DegradationLevel::Minor => 1,
            DegradationLevel::Moderate => 2,
            DegradationLevel::Severe => 3,
            DegradationLevel::Critical => 4,
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DegradationLevel::Full => "full",
            DegradationLevel::Minor => "minor",
            DegradationLevel::Moderate => "moderate",
            DegradationLevel::Severe => "severe",
            DegradationLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Shared state threaded through every stage's `run`/`stop` call.
///
/// `degradation_level` is an `AtomicU8` (1..=5 in the base spec's terms, here
/// `DegradationLevel::Full..=Critical`) so the dashboard server can read the
/// current level without taking a lock.
pub struct BootContext {
    level: AtomicU8,
    /// Names of stages currently running on a degraded fallback path.
    degraded_stages: std::sync::Mutex<Vec<&'static str>>,
    /// Base data directory, available to every stage.
    pub base_dir: std::path::PathBuf,
}

impl BootContext {
    pub fn new(base_dir: std::path::PathBuf) -> Self {
        Self {
            level: AtomicU8::new(0),
            degraded_stages: std::sync::Mutex::new(Vec::new()),
            base_dir,
        }
    }

    /// Current degradation level, safe to call from any task without locking.
    pub fn degradation_level(&self) -> DegradationLevel {
        DegradationLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Mark a stage degraded, raising the level if this pushes it higher.
    ///
    /// Level never decreases here; only [`BootContext::recover`] can lower it.
    pub fn degrade(&self, stage: &'static str, to: DegradationLevel) {
        let mut stages = self.degraded_stages.lock().unwrap();
        if !stages.contains(&stage) {
            stages.push(stage);
        }
        let target = to.as_u8();
        let _ = self
            .level
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                if target > cur {
                    Some(target)
                } else {
                    None
                }
            });
    }

    /// A previously degraded stage has recovered. Drops the level back down
    /// to the worst of whatever else is still degraded.
    pub fn recover(&self, stage: &'static str) {
        let mut stages = self.degraded_stages.lock().unwrap();
        stages.retain(|s| *s != stage);
        if stages.is_empty() {
            self.level.store(0, Ordering::Relaxed);
        }
    }

    /// Stages currently running in a degraded state.
    pub fn degraded_stages(&self) -> Vec<&'static str> {
        self.degraded_stages.lock().unwrap().clone()
    }
}

/// Outcome of running a single boot stage.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The stage came up fully as configured.
    Ready,
    /// The stage fell back to a reduced-capability path.
    Degraded(String),
}

/// A single ordered step in the boot sequence.
///
/// `fatal()` stages abort the whole bootstrap on error; non-fatal stages
/// report [`StageOutcome::Degraded`] instead and the controller continues.
#[async_trait]
pub trait BootStage: Send + Sync {
    /// Stable, operator-facing stage name (used in diagnostics and dashboard).
    fn name(&self) -> &'static str;

    /// Whether a failure here should abort the whole process.
    fn fatal(&self) -> bool;

    /// Bring the stage up.
    async fn run(&mut self, ctx: &BootContext) -> crate::error::Result<StageOutcome>;

    /// Tear the stage down. Called in reverse boot order during shutdown.
    /// Default no-op for stages with nothing to release.
    async fn stop(&mut self) {}
}

/// A diagnostic printed when a fatal stage fails, naming the stage, the
/// underlying cause, and a short remediation hint.
pub struct BootDiagnosis {
    pub stage: &'static str,
    pub cause: String,
    pub hint: &'static str,
}

impl std::fmt::Display for BootDiagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "boot failed at stage '{}': {}\nhint: {}",
            self.stage, self.cause, self.hint
        )
    }
}

/// Runs the ordered stage list, stopping at the first fatal failure.
pub struct Bootstrapper {
    stages: Vec<Box<dyn BootStage>>,
    ctx: Arc<BootContext>,
    /// How many stages (from the front) completed `run` successfully, so
    /// `shutdown` only calls `stop` on stages that actually started.
    started: usize,
}

impl Bootstrapper {
    pub fn new(base_dir: std::path::PathBuf) -> Self {
        Self {
            stages: Vec::new(),
            ctx: Arc::new(BootContext::new(base_dir)),
            started: 0,
        }
    }

    /// Append a stage to the end of the boot sequence.
    pub fn push(&mut self, stage: Box<dyn BootStage>) {
        self.stages.push(stage);
    }

    pub fn context(&self) -> Arc<BootContext> {
        self.ctx.clone()
    }

    /// Run every stage in order. Returns `Ok(())` once every stage has
    /// reported `Ready` or `Degraded`; returns `Err` with a [`BootDiagnosis`]
    /// printed to the log at the first fatal stage failure.
    pub async fn run_all(&mut self) -> Result<(), BootDiagnosis> {
        self.started = 0;
        for stage in self.stages.iter_mut() {
            let name = stage.name();
            info!(stage = name, "booting stage");
            match stage.run(&self.ctx).await {
                Ok(StageOutcome::Ready) => {
                    info!(stage = name, "stage ready");
                }
                Ok(StageOutcome::Degraded(reason)) => {
                    warn!(stage = name, reason = %reason, "stage degraded");
                    self.ctx.degrade(name, DegradationLevel::Minor);
                }
                Err(e) if stage.fatal() => {
                    let diagnosis = BootDiagnosis {
                        stage: name,
                        cause: e.to_string(),
                        hint: remediation_hint(name),
                    };
                    error!("{diagnosis}");
                    return Err(diagnosis);
                }
                Err(e) => {
                    warn!(stage = name, error = %e, "stage failed, continuing degraded");
                    self.ctx.degrade(name, DegradationLevel::Moderate);
                }
            }
            self.started += 1;
        }
        Ok(())
    }

    /// Stop every started stage in reverse order, bounding each stop with
    /// `per_step_timeout`.
    pub async fn shutdown(&mut self, per_step_timeout: Duration) {
        for stage in self.stages[..self.started].iter_mut().rev() {
            let name = stage.name();
            info!(stage = name, "stopping stage");
            if tokio::time::timeout(per_step_timeout, stage.stop())
                .await
                .is_err()
            {
                warn!(stage = name, "stage stop timed out");
            }
        }
    }
}

fn remediation_hint(stage: &str) -> &'static str {
    match stage {
        "security_foundation" => {
            "check VALUES.md and the vault directory permissions, then retry"
        }
        "model_router" => "set at least one provider API key and retry",
        "agents" => "ensure workspace/agents contains at least one agent directory",
        _ => "check the daemon log for the underlying cause",
    }
}
