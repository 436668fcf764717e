use crate::config::Config;
use crate::models::{FailureRecord, LifecycleRecord, RunState};
use crate::mqtt::PublishSink;
use crate::poll::{CycleError, PollCycle, TelegramDecoder, TelegramSource};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Timing and failure policy of the run loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    pub poll_interval: Duration,
    pub alive_interval: Duration,
    pub failure_threshold: u32,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            alive_interval: config.alive_interval(),
            failure_threshold: config.failure_threshold.max(1),
        }
    }
}

/// How the run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown was requested between two cycles
    Shutdown,
    /// Too many cycles in a row failed
    Aborted { failures: u32 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Shutdown => 0,
            RunOutcome::Aborted { .. } => 1,
        }
    }
}

/// Drives the poll cycle at a fixed interval and gives up after a row of failures
pub struct RunLoop<S, D, P> {
    cycle: PollCycle<S, D>,
    sink: P,
    settings: RunSettings,
    state: RunState,
}

impl<S: TelegramSource, D: TelegramDecoder, P: PublishSink> RunLoop<S, D, P> {
    pub fn new(cycle: PollCycle<S, D>, sink: P, settings: RunSettings) -> Self {
        Self {
            cycle,
            sink,
            settings,
            state: RunState::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    async fn cycle_once(&mut self) -> Result<(), CycleError> {
        if let Some(msg) = self.cycle.poll(&mut self.state).await? {
            self.sink.emit(&msg).await?;
        }
        Ok(())
    }

    /// Run one cycle and do the failure accounting. Returns the outcome once
    /// the failure threshold is reached.
    pub async fn step(&mut self) -> Option<RunOutcome> {
        match self.cycle_once().await {
            Ok(()) => {
                self.state.consecutive_failures = 0;
                None
            },
            Err(e) => {
                self.state.consecutive_failures += 1;
                let count = self.state.consecutive_failures;
                FailureRecord::transport(&e, count, e.location).log();

                if count >= self.settings.failure_threshold {
                    FailureRecord::abort(count, self.settings.failure_threshold).log();
                    return Some(RunOutcome::Aborted { failures: count });
                }
                None
            }
        }
    }

    /// Log a heartbeat when the alive interval has passed since the last one
    pub fn maybe_log_liveness(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.state.last_alive) < self.settings.alive_interval {
            return false;
        }
        LifecycleRecord::alive(&self.state).log();
        self.state.last_alive = now;
        true
    }

    /// Loop until the failure threshold is hit or `shutdown` completes.
    /// Shutdown is only looked at while sleeping, a running cycle always finishes.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> RunOutcome {
        tokio::pin!(shutdown);

        loop {
            if let Some(outcome) = self.step().await {
                return outcome;
            }
            self.maybe_log_liveness(Instant::now());

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {},
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return RunOutcome::Shutdown;
                }
            }
        }
    }

    /// Release the sink's transport
    pub async fn close(&mut self) {
        debug!("Closing publish sink");
        self.sink.close().await;
    }
}
