//! Tick driver pacing and error accounting on a paused tokio clock.

use std::time::Duration;

use tickwire_core::{SessionError, TransportError};
use tickwire_echo::{EchoError, TickApp, TickDriver, TickOutcome};

/// Finishes after `until` ticks, failing on the ticks listed in `failing`.
struct Script {
    ticks: u64,
    until: u64,
    failing: Vec<(u64, fn() -> EchoError)>,
    elapsed: Duration,
}

impl Script {
    fn new(until: u64) -> Self {
        Self { ticks: 0, until, failing: Vec::new(), elapsed: Duration::ZERO }
    }

    fn fail_on(mut self, tick: u64, err: fn() -> EchoError) -> Self {
        self.failing.push((tick, err));
        self
    }
}

impl TickApp for Script {
    fn tick(&mut self, delta: Duration) -> Result<TickOutcome, EchoError> {
        self.ticks += 1;
        self.elapsed += delta;

        if let Some((_, err)) = self.failing.iter().find(|(t, _)| *t == self.ticks) {
            return Err(err());
        }

        if self.ticks >= self.until { Ok(TickOutcome::Finished) } else { Ok(TickOutcome::Continue) }
    }
}

fn flush_failure() -> EchoError {
    EchoError::Session(SessionError::Flush(TransportError::Io("reset".to_string())))
}

fn poll_failure() -> EchoError {
    EchoError::Session(SessionError::Poll(TransportError::Protocol("corrupt".to_string())))
}

#[tokio::test(start_paused = true)]
async fn runs_until_the_app_finishes() {
    let driver = TickDriver::new(60).expect("valid rate");
    let mut app = Script::new(10);

    let started = tokio::time::Instant::now();
    let summary =
        driver.run_until(&mut app, std::future::pending()).await.expect("run should succeed");

    assert_eq!(summary.ticks, 10);
    assert!(summary.is_clean());
    assert!(!summary.interrupted);
    assert_eq!(app.elapsed, driver.timestep() * 10);

    // First interval tick fires immediately, the other nine are paced.
    assert!(started.elapsed() >= driver.timestep() * 9);
}

#[tokio::test(start_paused = true)]
async fn recoverable_errors_are_counted() {
    let driver = TickDriver::new(60).expect("valid rate");
    let mut app = Script::new(5).fail_on(2, flush_failure).fail_on(4, flush_failure);

    let summary =
        driver.run_until(&mut app, std::future::pending()).await.expect("run should succeed");

    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.failed_ticks, 2);
    assert!(!summary.is_clean());
}

#[tokio::test(start_paused = true)]
async fn fatal_error_stops_the_loop() {
    let driver = TickDriver::new(60).expect("valid rate");
    let mut app = Script::new(100).fail_on(3, poll_failure);

    let err = driver
        .run_until(&mut app, std::future::pending())
        .await
        .expect_err("fatal error should end the run");

    assert!(matches!(err, EchoError::Session(SessionError::Poll(_))));
    assert_eq!(app.ticks, 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_signal_interrupts() {
    let driver = TickDriver::new(10).expect("valid rate");
    let mut app = Script::new(u64::MAX);

    let shutdown = tokio::time::sleep(Duration::from_millis(450));
    let summary = driver.run_until(&mut app, shutdown).await.expect("run should succeed");

    assert!(summary.interrupted);
    assert!(summary.is_clean());
    assert!(summary.ticks >= 4 && summary.ticks <= 5, "ran {} ticks", summary.ticks);
}
