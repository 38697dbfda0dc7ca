//! In-memory idempotency store with single-flight coalescing.
//!
//! Maps `(tenant_id, idempotency_key)` to absent, in-flight, or completed
//! state. The single-flight barrier is a `watch` channel per in-flight
//! entry: the winner publishes the finished receipt on commit, waiters
//! observe it without re-executing. An in-flight marker carries its own
//! wall-clock deadline; past it the key reads as absent again, which bounds
//! the single-flight window across crashes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::domain::{IdempotencyKey, Receipt, TenantId};

use super::error::{GatewayError, Result};
use super::traits::{BeginOutcome, IdempotencyStore};

enum Entry {
    InFlight {
        tx: watch::Sender<Option<Receipt>>,
        deadline: DateTime<Utc>,
    },
    Completed {
        receipt: Receipt,
        expires_at: DateTime<Utc>,
    },
}

/// In-memory [`IdempotencyStore`].
pub struct InMemoryIdempotencyStore {
    entries: RwLock<HashMap<(TenantId, IdempotencyKey), Entry>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the key currently maps to a completed receipt.
    pub async fn has_completed(&self, tenant_id: &TenantId, key: &IdempotencyKey) -> bool {
        matches!(
            self.entries
                .read()
                .await
                .get(&(*tenant_id, key.clone())),
            Some(Entry::Completed { .. })
        )
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(
        &self,
        tenant_id: &TenantId,
        key: &IdempotencyKey,
        deadline: DateTime<Utc>,
    ) -> Result<BeginOutcome> {
        let now = Utc::now();
        let map_key = (*tenant_id, key.clone());
        let mut entries = self.entries.write().await;

        match entries.get(&map_key) {
            Some(Entry::Completed { receipt, expires_at }) if *expires_at > now => {
                return Ok(BeginOutcome::Completed(receipt.clone()));
            }
            Some(Entry::InFlight {
                tx,
                deadline: marker_deadline,
            }) if *marker_deadline > now => {
                return Ok(BeginOutcome::Join(tx.subscribe()));
            }
            Some(_) => {
                // Expired completed entry or stale in-flight marker: the key
                // reads as absent and a new execution may start. Replacing a
                // stale marker drops its sender, closing any lingering
                // waiters' channels.
                debug!(tenant_id = %tenant_id, key = %key, "Replacing expired idempotency entry");
            }
            None => {}
        }

        let (tx, _rx) = watch::channel(None);
        entries.insert(map_key, Entry::InFlight { tx, deadline });
        Ok(BeginOutcome::Started)
    }

    async fn commit(
        &self,
        tenant_id: &TenantId,
        key: &IdempotencyKey,
        receipt: Receipt,
        ttl_seconds: u64,
    ) -> Result<()> {
        let map_key = (*tenant_id, key.clone());
        let mut entries = self.entries.write().await;

        match entries.remove(&map_key) {
            Some(Entry::InFlight { tx, .. }) => {
                // Wake all barrier waiters with the finished receipt.
                let _ = tx.send(Some(receipt.clone()));
            }
            Some(Entry::Completed {
                receipt: existing,
                expires_at,
            }) => {
                // At most one completed receipt per key within the TTL; the
                // original entry stands.
                entries.insert(
                    map_key,
                    Entry::Completed {
                        receipt: existing,
                        expires_at,
                    },
                );
                return Err(GatewayError::Internal(format!(
                    "idempotency key {key} already holds a completed receipt"
                )));
            }
            None => {
                // Marker expired before commit; the receipt still stands.
                warn!(tenant_id = %tenant_id, key = %key, "Committing past an expired in-flight marker");
            }
        }

        if ttl_seconds > 0 {
            entries.insert(
                map_key,
                Entry::Completed {
                    receipt,
                    expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds as i64),
                },
            );
        }
        Ok(())
    }

    async fn abandon(&self, tenant_id: &TenantId, key: &IdempotencyKey) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(Entry::Completed { .. }) =
            entries.remove(&(*tenant_id, key.clone()))
        {
            return Err(GatewayError::Internal(format!(
                "abandon called on completed idempotency key {key}"
            )));
        }
        // Dropping the in-flight sender closes waiters' channels.
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::Completed { expires_at, .. } => *expires_at > now,
            Entry::InFlight { deadline, .. } => *deadline > now,
        });
        Ok(before - entries.len())
    }
}

/// Spawn the background sweep loop. Period must not exceed 60 seconds.
pub fn spawn_sweeper(
    store: Arc<dyn IdempotencyStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match store.sweep(Utc::now()).await {
                Ok(removed) if removed > 0 => {
                    debug!(removed, "Idempotency sweep removed expired entries");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Idempotency sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CapabilityId, CapabilityVersion, DecisionId, ReceiptId, ReceiptStatus, RequestId,
    };

    fn receipt(status: ReceiptStatus) -> Receipt {
        Receipt {
            id: ReceiptId::generate(),
            capability_id: CapabilityId::parse("slack.post_message").unwrap(),
            capability_version: CapabilityVersion::parse("1.0.0").unwrap(),
            tenant_id: TenantId::new(),
            request_id: RequestId::new(),
            idempotency_key: IdempotencyKey::parse("k1").unwrap(),
            input_hash: "ab".repeat(32),
            output_hash: Some("cd".repeat(32)),
            latency_ms: 25,
            status,
            error_code: None,
            error_detail: None,
            output_annotation: None,
            policy_decision_id: DecisionId::generate(),
            is_synthetic: false,
            timestamp: Utc::now(),
        }
    }

    fn far_deadline() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(60)
    }

    #[tokio::test]
    async fn test_begin_miss_installs_marker() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        let outcome = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_commit_then_begin_returns_receipt() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        store.begin(&tenant, &key, far_deadline()).await.unwrap();
        let stored = receipt(ReceiptStatus::Success);
        store
            .commit(&tenant, &key, stored.clone(), 86_400)
            .await
            .unwrap();

        let outcome = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        match outcome {
            BeginOutcome::Completed(found) => assert_eq!(found.id, stored.id),
            other => panic!("expected completed receipt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_ttl_commit_deletes_entry() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        store.begin(&tenant, &key, far_deadline()).await.unwrap();
        store
            .commit(&tenant, &key, receipt(ReceiptStatus::Failure), 0)
            .await
            .unwrap();

        // Failure receipts are not cached; retries re-execute.
        assert!(store.is_empty().await);
        let outcome = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started));
    }

    #[tokio::test]
    async fn test_concurrent_begin_joins_barrier() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        let first = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        assert!(matches!(first, BeginOutcome::Started));

        let second = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        let mut rx = match second {
            BeginOutcome::Join(rx) => rx,
            other => panic!("expected barrier join, got {other:?}"),
        };

        let stored = receipt(ReceiptStatus::Success);
        store
            .commit(&tenant, &key, stored.clone(), 86_400)
            .await
            .unwrap();

        let seen = rx.wait_for(|r| r.is_some()).await.unwrap();
        assert_eq!(seen.as_ref().unwrap().id, stored.id);
    }

    #[tokio::test]
    async fn test_abandon_closes_waiters() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        store.begin(&tenant, &key, far_deadline()).await.unwrap();
        let mut rx = match store.begin(&tenant, &key, far_deadline()).await.unwrap() {
            BeginOutcome::Join(rx) => rx,
            other => panic!("expected barrier join, got {other:?}"),
        };

        store.abandon(&tenant, &key).await.unwrap();

        // The sender is gone; the wait resolves with a closed-channel error.
        assert!(rx.wait_for(|r| r.is_some()).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_in_flight_marker_reads_as_absent() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        // Marker already past its deadline.
        let expired = Utc::now() - chrono::Duration::seconds(1);
        store.begin(&tenant, &key, expired).await.unwrap();

        let outcome = store.begin(&tenant, &key, far_deadline()).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started));
    }

    #[tokio::test]
    async fn test_keys_are_tenant_scoped() {
        let store = InMemoryIdempotencyStore::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let key = IdempotencyKey::parse("shared-key").unwrap();

        store.begin(&tenant_a, &key, far_deadline()).await.unwrap();
        store
            .commit(&tenant_a, &key, receipt(ReceiptStatus::Success), 86_400)
            .await
            .unwrap();

        // Same key under a different tenant is absent.
        let outcome = store.begin(&tenant_b, &key, far_deadline()).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let key = IdempotencyKey::parse("k1").unwrap();

        store.begin(&tenant, &key, far_deadline()).await.unwrap();
        store
            .commit(&tenant, &key, receipt(ReceiptStatus::Success), 1)
            .await
            .unwrap();

        let removed = store
            .sweep(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty().await);
    }
}
