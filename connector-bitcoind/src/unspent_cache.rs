//! In-memory mirror of the node's spendable outputs
//!
//! The cache holds every unlocked output with enough confirmations, keyed by
//! outpoint. It is refreshed wholesale by [`UnspentCache::sync`] and shrinks as
//! crafted transactions consume outputs. All operations share one mutex which
//! is independent of the crafting lock, so balance reads never wait for a
//! craft in progress.
//!
//! Outputs handed out in a crafted transaction are remembered as
//! reservations. A resync skips them while the node still lists them as
//! unspent, because the crafting path unlocks every output at the node before
//! each craft and the node would otherwise offer them again.
//!
//! The node hides locked outputs from `list_unspent`, so a missing output is
//! only known to be spent when nothing is locked. Reservations are therefore
//! pruned by [`UnspentCache::sync_unlocked`] alone, never by a plain
//! [`UnspentCache::sync`].

use bitcoin::{Amount, OutPoint};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use crate::client::{NodeClient, NodeError, UnspentOutput};

/// Upper confirmation bound passed to `list_unspent`
pub const MAX_CONFIRMATIONS: u32 = i32::MAX as u32;

/// Outcome of a successful sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    /// Outputs now held by the cache
    pub outputs: usize,
    /// Their total value
    pub total: Amount,
    /// Listed outputs skipped because they are reserved
    pub reserved: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    outputs: BTreeMap<OutPoint, UnspentOutput>,
    reserved: HashSet<OutPoint>,
}

/// Mutex-guarded set of spendable outputs
#[derive(Debug)]
pub struct UnspentCache {
    min_confirmations: u32,
    state: Mutex<CacheState>,
}

impl UnspentCache {
    pub fn new(min_confirmations: u32) -> Self {
        Self {
            min_confirmations,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn min_confirmations(&self) -> u32 {
        self.min_confirmations
    }

    /// Replace the cached set with the node's current view
    ///
    /// Reservations are kept whether or not the node lists them. On failure
    /// the previous set is left untouched.
    pub fn sync<C: NodeClient + ?Sized>(&self, client: &C) -> Result<SyncSummary, NodeError> {
        self.refresh(client, false)
    }

    /// Replace the cached set right after every output was unlocked at the node
    ///
    /// With no locks in place an output the node no longer lists has been
    /// spent, so its reservation is dropped.
    pub fn sync_unlocked<C: NodeClient + ?Sized>(
        &self,
        client: &C,
    ) -> Result<SyncSummary, NodeError> {
        self.refresh(client, true)
    }

    fn refresh<C: NodeClient + ?Sized>(
        &self,
        client: &C,
        prune_reservations: bool,
    ) -> Result<SyncSummary, NodeError> {
        let mut state = self.state.lock();

        let listed = client.list_unspent(self.min_confirmations, MAX_CONFIRMATIONS)?;

        if prune_reservations {
            let listed_outpoints: HashSet<OutPoint> =
                listed.iter().map(|u| u.outpoint).collect();
            state.reserved.retain(|outpoint| listed_outpoints.contains(outpoint));
        }

        let mut outputs = BTreeMap::new();
        let mut skipped = 0;
        for output in listed {
            if output.confirmations < self.min_confirmations {
                continue;
            }
            if state.reserved.contains(&output.outpoint) {
                skipped += 1;
                continue;
            }
            outputs.insert(output.outpoint, output);
        }
        state.outputs = outputs;

        let summary = SyncSummary {
            outputs: state.outputs.len(),
            total: total_of(state.outputs.values()),
            reserved: skipped,
        };

        trace!(
            "Synced {} unspent outputs, total {} sat, {} reserved skipped",
            summary.outputs,
            summary.total.to_sat(),
            summary.reserved
        );

        Ok(summary)
    }

    /// Cached outputs, oldest first
    ///
    /// Ordered by confirmations descending, then txid and output index.
    pub fn snapshot(&self) -> Vec<UnspentOutput> {
        let state = self.state.lock();
        let mut outputs: Vec<UnspentOutput> = state.outputs.values().cloned().collect();
        // Stable sort keeps the outpoint order of the map for equal confirmations.
        outputs.sort_by(|a, b| b.confirmations.cmp(&a.confirmations));
        outputs
    }

    /// Remove entries; unknown outpoints are ignored
    pub fn remove(&self, outpoints: &[OutPoint]) {
        let mut state = self.state.lock();
        for outpoint in outpoints {
            state.outputs.remove(outpoint);
        }
    }

    /// Remove entries and reserve them against later resyncs
    pub fn consume(&self, outpoints: &[OutPoint]) {
        let mut state = self.state.lock();
        for outpoint in outpoints {
            state.outputs.remove(outpoint);
            state.reserved.insert(*outpoint);
        }
        debug!(
            "Consumed {} outputs, {} reservations outstanding",
            outpoints.len(),
            state.reserved.len()
        );
    }

    /// Drop every cached output and reservation
    ///
    /// The next craft resyncs from the node.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.outputs.clear();
        state.reserved.clear();
    }

    pub fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        self.state.lock().reserved.contains(outpoint)
    }

    pub fn reserved_count(&self) -> usize {
        self.state.lock().reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().outputs.len()
    }

    /// Sum of all cached amounts
    pub fn total(&self) -> Amount {
        total_of(self.state.lock().outputs.values())
    }
}

fn total_of<'a>(outputs: impl Iterator<Item = &'a UnspentOutput>) -> Amount {
    Amount::from_sat(
        outputs.fold(0u64, |sum, output| sum.saturating_add(output.amount.to_sat())),
    )
}
