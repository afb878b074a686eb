//! Correlator (C9): groups raw response columns arriving from concurrent
//! query-recovery streams into [`CorrelatedBlock`]s keyed by timebase
//! fingerprint (§4.7).
//!
//! Backed by `dashmap` for its striped-lock semantics: columns for distinct
//! timebases merge without contending on a single global lock, the same way
//! the ingestion channel runs its streams concurrently without a shared
//! mutex around the whole frame set.

use dashmap::DashMap;

use crate::error::{DpError, DpResult};
use crate::frame::FrameColumn;
use crate::types::{Timebase, TimebaseFingerprint};

/// A set of columns that share exactly one timebase, assembled from
/// possibly many partial responses.
#[derive(Debug, Clone)]
pub struct CorrelatedBlock {
    pub timebase: Timebase,
    pub columns: Vec<FrameColumn>,
}

/// Accumulates [`CorrelatedBlock`]s as raw `(timebase, columns)` pairs
/// arrive from any number of concurrent producers.
#[derive(Default)]
pub struct Correlator {
    blocks: DashMap<TimebaseFingerprint, CorrelatedBlock>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `columns` into the block for `timebase`'s fingerprint,
    /// creating one if none exists yet. Rejects a column whose source name
    /// already appears in that block (§4.7 consistency rule).
    pub fn ingest(&self, timebase: Timebase, columns: Vec<FrameColumn>) -> DpResult<()> {
        let fingerprint = timebase.fingerprint();
        let mut entry = self
            .blocks
            .entry(fingerprint)
            .or_insert_with(|| CorrelatedBlock {
                timebase: timebase.clone(),
                columns: Vec::new(),
            });

        for column in columns {
            if entry
                .columns
                .iter()
                .any(|existing| existing.source_name == column.source_name)
            {
                return Err(DpError::consistency(format!(
                    "source '{}' already correlated for this timebase",
                    column.source_name
                )));
            }
            entry.columns.push(column);
        }
        Ok(())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Snapshots every accumulated block, ordered by `(start, duration)` as
    /// §4.7 requires of the final correlated sequence. Takes `&self` rather
    /// than consuming so callers holding the correlator behind a shared
    /// `Arc` (as `QueryRecoverer` does) don't need to unwrap it first.
    pub fn into_sorted_blocks(&self) -> Vec<CorrelatedBlock> {
        let mut blocks: Vec<CorrelatedBlock> = self
            .blocks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        blocks.sort_by(|a, b| {
            a.timebase
                .start()
                .cmp(&b.timebase.start())
                .then(a.timebase.duration().cmp(&b.timebase.duration()))
                .then(a.timebase.count().cmp(&b.timebase.count()))
        });
        blocks
    }
}
