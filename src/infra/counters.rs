//! Budget counter store.
//!
//! Counters live under `(tenant_id, capability_id, period_key)` where the
//! period key is `YYYY-MM-DD` for daily windows and `YYYY-MM` for monthly
//! windows, both UTC. Rollover needs no scheduled reset: a new UTC day or
//! month produces a new key whose counters read as zero.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{BudgetSnapshot, CapabilityId, TenantId};

use super::error::Result;
use super::traits::BudgetCounters;

/// Daily period key, e.g. `2026-08-02`.
pub fn daily_period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Monthly period key, e.g. `2026-08`.
pub fn monthly_period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

#[derive(Default, Clone, Copy)]
struct Counter {
    calls: u64,
    cost_cents: u64,
}

/// In-memory [`BudgetCounters`].
pub struct InMemoryBudgetCounters {
    counters: RwLock<HashMap<(TenantId, CapabilityId, String), Counter>>,
}

impl InMemoryBudgetCounters {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBudgetCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BudgetCounters for InMemoryBudgetCounters {
    async fn snapshot(
        &self,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
        now: DateTime<Utc>,
    ) -> Result<BudgetSnapshot> {
        let counters = self.counters.read().await;
        let daily = counters
            .get(&(*tenant_id, capability_id.clone(), daily_period_key(now)))
            .copied()
            .unwrap_or_default();
        let monthly = counters
            .get(&(*tenant_id, capability_id.clone(), monthly_period_key(now)))
            .copied()
            .unwrap_or_default();
        Ok(BudgetSnapshot {
            daily_calls_used: daily.calls,
            monthly_calls_used: monthly.calls,
            daily_cost_cents_used: daily.cost_cents,
            monthly_cost_cents_used: monthly.cost_cents,
        })
    }

    async fn record_success(
        &self,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
        cost_cents: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut counters = self.counters.write().await;
        for period_key in [daily_period_key(now), monthly_period_key(now)] {
            let counter = counters
                .entry((*tenant_id, capability_id.clone(), period_key))
                .or_default();
            counter.calls += 1;
            counter.cost_cents += cost_cents;
        }
        Ok(())
    }
}
