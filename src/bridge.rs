//! Event bridge: foreign-thread notifications to one async consumer.
//!
//! The protocol client calls [`EventBridge::notify`] on its own receive
//! thread. `notify` snapshots the raw notification into an [`Event`] and
//! pushes it into a bounded [`tokio::sync::broadcast`] ring; it never
//! blocks and never awaits. A single consumer task drains the ring in
//! order, logs diagnostics, serializes each event and hands it to the
//! [`TransportSink`].
//!
//! When the ring is full the oldest queued events are dropped and the
//! consumer logs how many it missed. [`EventBridge::shutdown`] stops
//! intake and enqueues a sentinel; the consumer exits when it reaches it.
//! The intake flag and every send share one lock, so nothing is ever
//! queued behind the sentinel and it cannot be evicted.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::domain::{Event, EventCategory, LatencyReport, TimestampPrecision, diagnostics};
use crate::protocol::{NotificationTarget, RawEvent, SessionClock};
use crate::serialize::SerializedPayload;
use crate::sink::TransportSink;

const MAX_CAPACITY: usize = 1 << 16;

/// Tuning for one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Ring capacity; clamped to `1..=65536`.
    pub capacity: usize,
    /// Timestamp precision of diagnostic lines.
    pub precision: TimestampPrecision,
    /// Bound on one session clock read.
    pub clock_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            precision: TimestampPrecision::Millis,
            clock_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
enum BridgeItem {
    Event(Arc<Event>),
    Shutdown,
}

/// Why a consumer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// Reached the shutdown sentinel.
    Shutdown,
    /// The sink reported a transport failure and was closed.
    SinkFailed,
    /// Every producer handle was dropped.
    QueueClosed,
    /// The consumer task panicked or was cancelled.
    Aborted,
}

/// One category's pipeline on one connection.
pub struct EventBridge {
    endpoint: String,
    category: EventCategory,
    sender: broadcast::Sender<BridgeItem>,
    accepting: StdMutex<bool>,
    task: Mutex<Option<JoinHandle<BridgeExit>>>,
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("endpoint", &self.endpoint)
            .field("category", &self.category)
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl EventBridge {
    /// Creates the ring and spawns the consumer on the current runtime.
    ///
    /// `clock` is read once per result ready event for the latency report.
    pub fn spawn(
        endpoint: impl Into<String>,
        category: EventCategory,
        sink: Arc<dyn TransportSink>,
        clock: Option<Arc<dyn SessionClock>>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        let endpoint = endpoint.into();
        let (sender, receiver) = broadcast::channel(settings.capacity.clamp(1, MAX_CAPACITY));
        let consumer = Consumer {
            endpoint: endpoint.clone(),
            category,
            receiver,
            sink,
            clock,
            settings,
        };
        let task = tokio::spawn(consumer.run());
        tracing::debug!(endpoint = %endpoint, category = %category, "event bridge started");

        Arc::new(Self {
            endpoint,
            category,
            sender,
            accepting: StdMutex::new(true),
            task: Mutex::new(Some(task)),
        })
    }

    /// Category this bridge carries.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.category
    }

    /// Whether notifications are still accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        *self.intake()
    }

    fn intake(&self) -> std::sync::MutexGuard<'_, bool> {
        self.accepting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops intake and enqueues the sentinel. Safe to call repeatedly.
    ///
    /// Events queued before the call are still delivered.
    pub fn shutdown(&self) {
        let mut accepting = self.intake();
        if !*accepting {
            return;
        }
        *accepting = false;
        tracing::debug!(
            endpoint = %self.endpoint,
            category = %self.category,
            "event bridge shutting down"
        );
        // Err only means the consumer is already gone.
        let _ = self.sender.send(BridgeItem::Shutdown);
    }

    /// Waits for the consumer to exit. Returns `None` if another caller
    /// already collected the exit.
    pub async fn finished(&self) -> Option<BridgeExit> {
        let task = self.task.lock().await.take()?;
        Some(task.await.unwrap_or_else(|e| {
            tracing::warn!(
                endpoint = %self.endpoint,
                category = %self.category,
                error = %e,
                "event bridge consumer did not finish cleanly"
            );
            BridgeExit::Aborted
        }))
    }
}

impl NotificationTarget for EventBridge {
    fn notify(&self, raw: RawEvent) {
        let received_at = Utc::now();
        match Event::from_raw(self.category, &raw, received_at) {
            Ok(event) => {
                let accepting = self.intake();
                if !*accepting {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        category = %self.category,
                        "notification after shutdown dropped"
                    );
                } else if self.sender.send(BridgeItem::Event(Arc::new(event))).is_err() {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        category = %self.category,
                        "bridge consumer gone; notification dropped"
                    );
                }
            }
            Err(e) => tracing::warn!(
                endpoint = %self.endpoint,
                category = %self.category,
                event_type = %raw.event_type,
                error = %e,
                "malformed notification dropped"
            ),
        }
    }
}

struct Consumer {
    endpoint: String,
    category: EventCategory,
    receiver: broadcast::Receiver<BridgeItem>,
    sink: Arc<dyn TransportSink>,
    clock: Option<Arc<dyn SessionClock>>,
    settings: BridgeSettings,
}

impl Consumer {
    async fn run(mut self) -> BridgeExit {
        loop {
            let item = match self.receiver.recv().await {
                Ok(item) => item,
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        category = %self.category,
                        dropped,
                        "bridge queue overflowed; oldest events dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return BridgeExit::QueueClosed,
            };
            let BridgeItem::Event(event) = item else {
                tracing::debug!(endpoint = %self.endpoint, category = %self.category, "event bridge stopped");
                return BridgeExit::Shutdown;
            };

            self.report(&event).await;
            let payload = SerializedPayload::from_event(&event);
            match self.sink.send(&payload).await {
                Ok(()) => {}
                Err(e) if !e.is_transport_failure() => tracing::warn!(
                    endpoint = %self.endpoint,
                    category = %self.category,
                    event_id = %payload.event_id,
                    error = %e,
                    "event skipped"
                ),
                Err(e) => {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        category = %self.category,
                        error = %e,
                        "transport failed; event bridge stopping"
                    );
                    self.sink.close().await;
                    return BridgeExit::SinkFailed;
                }
            }
        }
    }

    async fn report(&self, event: &Event) {
        match event {
            Event::ResultReady(result) => {
                let session_clock = self.read_clock().await;
                let report = result.header.time.map(|generated| {
                    LatencyReport::compute(generated, result.header.received_at(), session_clock)
                        .with_processing_end(result.processing_end())
                });
                diagnostics::log_result_event(
                    result,
                    report.as_ref(),
                    session_clock,
                    self.settings.precision,
                );
            }
            Event::JoiningSystem(joining) => {
                diagnostics::log_joining_event(joining, self.settings.precision);
            }
        }
    }

    async fn read_clock(&self) -> Option<DateTime<Utc>> {
        let clock = self.clock.as_ref()?;
        match tokio::time::timeout(self.settings.clock_timeout, clock.current_time()).await {
            Ok(Ok(now)) => Some(now),
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "session clock unavailable");
                None
            }
            Err(_) => {
                tracing::debug!(endpoint = %self.endpoint, "session clock read timed out");
                None
            }
        }
    }
}
