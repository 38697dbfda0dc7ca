//! Best-effort outcome fan-out.
//!
//! Freshly written receipts are handed to a bounded channel drained by a
//! background worker that fans each one out to its subscribers (the trust
//! plane's outcome store, the on-chain receipt publisher). Emission never
//! blocks the pipeline and subscriber failures never affect the returned
//! receipt; they are surfaced through per-subscriber error counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{OutcomeEvent, Receipt};
use crate::infra::{OutcomeEventStore, ReceiptPublisher, Result};

/// A consumer of freshly written receipts.
#[async_trait]
pub trait OutcomeSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, receipt: &Receipt) -> Result<()>;
}

/// Projects receipts into outcome events for the trust scorer.
pub struct TrustPlaneSink {
    store: Arc<dyn OutcomeEventStore>,
}

impl TrustPlaneSink {
    pub fn new(store: Arc<dyn OutcomeEventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OutcomeSubscriber for TrustPlaneSink {
    fn name(&self) -> &'static str {
        "trust_plane"
    }

    async fn deliver(&self, receipt: &Receipt) -> Result<()> {
        self.store.append(OutcomeEvent::from_receipt(receipt)).await
    }
}

/// Hands receipts to the external on-chain publisher.
pub struct ReceiptPublisherSink {
    publisher: Arc<dyn ReceiptPublisher>,
}

impl ReceiptPublisherSink {
    pub fn new(publisher: Arc<dyn ReceiptPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl OutcomeSubscriber for ReceiptPublisherSink {
    fn name(&self) -> &'static str {
        "receipt_publisher"
    }

    async fn deliver(&self, receipt: &Receipt) -> Result<()> {
        self.publisher.publish(receipt).await
    }
}

/// Emission counters, visible to operators and tests.
pub struct EmitterStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    subscriber_failures: HashMap<&'static str, AtomicU64>,
}

impl EmitterStats {
    fn new(subscriber_names: &[&'static str]) -> Self {
        Self {
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            subscriber_failures: subscriber_names
                .iter()
                .map(|name| (*name, AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Events accepted onto the channel.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Delivery failures for one subscriber.
    pub fn failures(&self, subscriber: &str) -> u64 {
        self.subscriber_failures
            .get(subscriber)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Handle the pipeline emits through.
#[derive(Clone)]
pub struct OutcomeEmitter {
    tx: mpsc::Sender<Receipt>,
    stats: Arc<EmitterStats>,
}

impl OutcomeEmitter {
    /// Spawn the fan-out worker and return the emit handle.
    pub fn spawn(
        capacity: usize,
        subscribers: Vec<Arc<dyn OutcomeSubscriber>>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let names: Vec<&'static str> = subscribers.iter().map(|s| s.name()).collect();
        let stats = Arc::new(EmitterStats::new(&names));
        let (tx, mut rx) = mpsc::channel::<Receipt>(capacity);

        let worker_stats = stats.clone();
        let handle = tokio::spawn(async move {
            while let Some(receipt) = rx.recv().await {
                for subscriber in &subscribers {
                    if let Err(e) = subscriber.deliver(&receipt).await {
                        if let Some(counter) =
                            worker_stats.subscriber_failures.get(subscriber.name())
                        {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        warn!(
                            subscriber = subscriber.name(),
                            receipt_id = %receipt.id,
                            error = %e,
                            "Outcome delivery failed"
                        );
                    }
                }
            }
        });

        (Self { tx, stats }, handle)
    }

    /// Hand a receipt to the fan-out worker without blocking. Overflow is
    /// counted and logged, never propagated to the caller.
    pub fn emit(&self, receipt: Receipt) {
        match self.tx.try_send(receipt) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Outcome channel full or closed; event dropped");
            }
        }
    }

    pub fn stats(&self) -> &EmitterStats {
        &self.stats
    }
}
