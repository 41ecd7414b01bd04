//! Per-owner concurrency admission.
//!
//! Each owner has a tier-derived number of slots. A submission claims the
//! first free slot (compare-and-swap on the slot table's primary key) or
//! is rejected synchronously. Slots are released exactly when the holding
//! run reaches a terminal state, and survive restarts because the table is
//! part of the durable store.

use std::collections::HashMap;
use std::sync::Arc;

use rf_core::config::TierConfig;
use rf_core::{OwnerId, Result, RunId};
use rf_db::queries::slots;
use rf_db::{get_conn, DbPool};

/// Maps an owner to its concurrency limit.
pub trait TierLookup: Send + Sync {
    fn limit_for(&self, owner_id: &OwnerId) -> u32;
}

/// Tier lookup backed by configuration: a default limit plus per-owner
/// overrides.
pub struct ConfigTierLookup {
    default_limit: u32,
    overrides: HashMap<String, u32>,
}

impl ConfigTierLookup {
    pub fn new(default_limit: u32, overrides: HashMap<String, u32>) -> Self {
        Self {
            default_limit,
            overrides,
        }
    }
}

impl From<&TierConfig> for ConfigTierLookup {
    fn from(cfg: &TierConfig) -> Self {
        Self::new(cfg.default_limit, cfg.overrides.clone())
    }
}

impl TierLookup for ConfigTierLookup {
    fn limit_for(&self, owner_id: &OwnerId) -> u32 {
        self.overrides
            .get(owner_id.as_str())
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// Claims and releases per-owner run slots.
pub struct AdmissionController {
    pool: DbPool,
    tiers: Arc<dyn TierLookup>,
}

impl AdmissionController {
    pub fn new(pool: DbPool, tiers: Arc<dyn TierLookup>) -> Self {
        Self { pool, tiers }
    }

    /// Try to claim a slot for a new run. Returns the claimed slot index,
    /// or `None` when the owner is at its limit.
    pub fn acquire(&self, owner_id: &OwnerId, run_id: &RunId) -> Result<Option<u32>> {
        let limit = self.tiers.limit_for(owner_id);
        let conn = get_conn(&self.pool)?;

        // Scan slot indexes in order; the primary key on
        // (owner_id, slot_index) makes each claim atomic.
        for slot in 0..limit {
            if slots::try_claim(&conn, owner_id, slot, run_id)? {
                tracing::debug!(owner_id = %owner_id, run_id = %run_id, slot, "Slot acquired");
                return Ok(Some(slot));
            }
        }

        tracing::debug!(owner_id = %owner_id, run_id = %run_id, limit, "Owner at concurrency limit");
        Ok(None)
    }

    /// Release the slot held by a run. Double releases return `false` and
    /// are logged by the caller rather than treated as errors.
    pub fn release(&self, owner_id: &OwnerId, run_id: &RunId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        slots::release(&conn, owner_id, run_id)
    }
}
