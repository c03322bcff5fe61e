//! Suspend detection
//!
//! Watches the wall clock against a monotonic tick. When the wall clock
//! advanced far more than the tick interval, the machine was suspended in
//! between and a `Sleep` followed by a `Wake` event is reported.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use fwid_core::error::MonitorError;
use fwid_core::traits::EventSource;
use fwid_core::SleepEvent;

/// How often the wall clock is sampled
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Extra wall-clock time beyond the interval that counts as a suspend
pub const SUSPEND_THRESHOLD: Duration = Duration::from_secs(30);

/// Whether `wall_elapsed` between two ticks `expected` apart means a suspend
pub fn is_suspend_gap(wall_elapsed: Duration, expected: Duration, threshold: Duration) -> bool {
    wall_elapsed > expected.saturating_add(threshold)
}

/// Sleep/wake event source based on wall-clock jumps
pub struct SleepMonitor {
    interval: Duration,
    threshold: Duration,
    events_tx: Option<mpsc::Sender<SleepEvent>>,
    events: mpsc::Receiver<SleepEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SleepMonitor {
    pub fn new(interval: Duration, threshold: Duration) -> Self {
        let (events_tx, events) = mpsc::channel(1);
        Self {
            interval,
            threshold,
            events_tx: Some(events_tx),
            events,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

impl Default for SleepMonitor {
    fn default() -> Self {
        Self::new(CHECK_INTERVAL, SUSPEND_THRESHOLD)
    }
}

#[async_trait]
impl EventSource for SleepMonitor {
    type Event = SleepEvent;

    async fn start(&mut self) -> Result<(), MonitorError> {
        let events_tx = self.events_tx.take().ok_or(MonitorError::AlreadyStarted)?;
        let interval = self.interval;
        let threshold = self.threshold;
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last = SystemTime::now();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = SystemTime::now();
                let elapsed = now.duration_since(last).unwrap_or_default();
                last = now;
                if !is_suspend_gap(elapsed, interval, threshold) {
                    continue;
                }

                tracing::info!("Detected system suspend of about {}s", elapsed.as_secs());
                for event in [SleepEvent::Sleep, SleepEvent::Wake] {
                    tokio::select! {
                        result = events_tx.send(event) => {
                            if result.is_err() {
                                return;
                            }
                        }
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        self.events_tx = None;
        while self.events.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn events(&mut self) -> &mut mpsc::Receiver<SleepEvent> {
        &mut self.events
    }
}
