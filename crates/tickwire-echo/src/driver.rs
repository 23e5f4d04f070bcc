//! Fixed-timestep tick loop.
//!
//! One tick is: advance time, drain events, react, flush. The driver owns
//! pacing only; everything else happens inside [`TickApp::tick`]. Ticks never
//! overlap: the next one starts after the previous returned and the interval
//! fired again.

use std::{future::Future, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::error::EchoError;

/// Whether the loop keeps going after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run another tick.
    Continue,
    /// The application is done.
    Finished,
}

/// An application stepped by a [`TickDriver`].
pub trait TickApp {
    /// Run one tick of `delta` simulated time.
    ///
    /// Recoverable errors are counted by the driver and the loop continues;
    /// fatal ones end it.
    fn tick(&mut self, delta: Duration) -> Result<TickOutcome, EchoError>;
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks executed
    pub ticks: u64,
    /// Ticks that returned a recoverable error
    pub failed_ticks: u64,
    /// Stopped by the shutdown signal rather than the application
    pub interrupted: bool,
}

impl RunSummary {
    /// True if no tick reported an error.
    pub fn is_clean(&self) -> bool {
        self.failed_ticks == 0
    }
}

/// Paces a [`TickApp`] at a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct TickDriver {
    timestep: Duration,
}

impl TickDriver {
    /// Driver ticking `tick_rate` times per second.
    ///
    /// # Errors
    ///
    /// - `EchoError::InvalidTickRate` if `tick_rate` is zero
    pub fn new(tick_rate: u32) -> Result<Self, EchoError> {
        if tick_rate == 0 {
            return Err(EchoError::InvalidTickRate);
        }

        Ok(Self { timestep: Duration::from_secs(1) / tick_rate })
    }

    /// Length of one tick.
    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    /// Run until the application finishes or ctrl-c arrives.
    pub async fn run<A: TickApp>(&self, app: &mut A) -> Result<RunSummary, EchoError> {
        self.run_until(app, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "cannot listen for ctrl-c, stopping");
            }
        })
        .await
    }

    /// Run until the application finishes or `shutdown` completes.
    ///
    /// # Errors
    ///
    /// The first fatal error returned by a tick.
    pub async fn run_until<A, F>(&self, app: &mut A, shutdown: F) -> Result<RunSummary, EchoError>
    where
        A: TickApp,
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.timestep);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        let mut summary = RunSummary::default();

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(ticks = summary.ticks, "shutdown requested");
                    summary.interrupted = true;
                    break;
                },
                _ = interval.tick() => {},
            }

            summary.ticks += 1;

            match app.tick(self.timestep) {
                Ok(TickOutcome::Continue) => {},
                Ok(TickOutcome::Finished) => break,
                Err(err) if err.is_fatal() => {
                    tracing::error!(error = %err, tick = summary.ticks, "fatal tick error");
                    return Err(err);
                },
                Err(err) => {
                    summary.failed_ticks += 1;
                    tracing::warn!(error = %err, tick = summary.ticks, "tick reported an error");
                },
            }
        }

        Ok(summary)
    }
}
