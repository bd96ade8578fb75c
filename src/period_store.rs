// 📦 Period Store - adapter output, not yet consolidated
//
// One slot per RecordKey; the slot index is the RecordId the union-find is
// keyed on. Re-ingesting a period appends revisions to slots, it never
// rewrites them, so every record ever produced stays available for audit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::adapter::PeriodBatch;
use crate::records::{PeriodRecord, Quarantined, RecordId, RecordKey, TransactionRecord};
use crate::temporal::PeriodId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// First batch for this period
    New,

    /// Period seen before, content changed
    Revised,

    /// Same digest as the period's latest batch; nothing happened
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub period: PeriodId,
    pub digest: String,
    pub status: IngestStatus,
    pub added: Vec<RecordId>,
    pub revised: Vec<RecordId>,
    pub transactions: usize,
    pub quarantined: usize,
    pub duplicates: usize,
}

impl IngestOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} {:?}: {} new records, {} revised, {} transactions, {} quarantined, {} duplicates collapsed",
            self.period,
            self.status,
            self.added.len(),
            self.revised.len(),
            self.transactions,
            self.quarantined,
            self.duplicates
        )
    }
}

/// Every revision of one record key
#[derive(Debug, Clone)]
struct Slot {
    key: RecordKey,
    revisions: Vec<PeriodRecord>,
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub digest: String,
    pub batch: PeriodBatch,
}

#[derive(Debug, Default)]
pub struct PeriodStore {
    slots: Vec<Slot>,
    index: HashMap<RecordKey, RecordId>,
    batches: BTreeMap<PeriodId, Vec<BatchEntry>>,
    dirty: BTreeSet<RecordId>,
}

impl PeriodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one adapter batch; identical re-ingestion is a no-op
    pub fn ingest(&mut self, batch: PeriodBatch) -> IngestOutcome {
        let digest = batch.digest();
        let period = batch.period;

        let previous = self.batches.get(&period).and_then(|entries| entries.last());
        if previous.map(|e| e.digest == digest).unwrap_or(false) {
            debug!(%period, "batch unchanged, skipping");
            return IngestOutcome {
                period,
                digest,
                status: IngestStatus::Unchanged,
                added: Vec::new(),
                revised: Vec::new(),
                transactions: batch.transactions.len(),
                quarantined: batch.quarantined.len(),
                duplicates: batch.duplicate_transactions,
            };
        }
        let status = if previous.is_some() {
            IngestStatus::Revised
        } else {
            IngestStatus::New
        };

        let mut added = Vec::new();
        let mut revised = Vec::new();
        for record in batch.records() {
            match self.index.get(&record.key).copied() {
                None => {
                    let id = self.slots.len() as RecordId;
                    self.slots.push(Slot {
                        key: record.key.clone(),
                        revisions: vec![record.clone()],
                    });
                    self.index.insert(record.key.clone(), id);
                    self.dirty.insert(id);
                    added.push(id);
                }
                Some(id) => {
                    let slot = &mut self.slots[id as usize];
                    if slot.revisions.last() != Some(record) {
                        slot.revisions.push(record.clone());
                        self.dirty.insert(id);
                        revised.push(id);
                    }
                }
            }
        }

        let outcome = IngestOutcome {
            period,
            digest: digest.clone(),
            status,
            added,
            revised,
            transactions: batch.transactions.len(),
            quarantined: batch.quarantined.len(),
            duplicates: batch.duplicate_transactions,
        };
        info!("📥 {}", outcome.summary());

        self.batches
            .entry(period)
            .or_default()
            .push(BatchEntry { digest, batch });
        outcome
    }

    /// Records added or revised since the last call
    pub fn take_dirty(&mut self) -> Vec<RecordId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Force a full re-match on the next run
    pub fn mark_all_dirty(&mut self) {
        self.dirty = (0..self.slots.len() as RecordId).collect();
    }

    pub fn mark_dirty(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        self.dirty
            .extend(ids.into_iter().filter(|&id| (id as usize) < self.slots.len()));
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current (latest) revision of a record
    pub fn get(&self, id: RecordId) -> Option<&PeriodRecord> {
        self.slots.get(id as usize).and_then(|s| s.revisions.last())
    }

    pub fn key(&self, id: RecordId) -> Option<&RecordKey> {
        self.slots.get(id as usize).map(|s| &s.key)
    }

    pub fn id_of(&self, key: &RecordKey) -> Option<RecordId> {
        self.index.get(key).copied()
    }

    pub fn revisions(&self, id: RecordId) -> &[PeriodRecord] {
        self.slots
            .get(id as usize)
            .map(|s| s.revisions.as_slice())
            .unwrap_or(&[])
    }

    /// (id, current revision) for every record
    pub fn records(&self) -> impl Iterator<Item = (RecordId, &PeriodRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.revisions.last().map(|r| (i as RecordId, r)))
    }

    pub fn periods(&self) -> Vec<PeriodId> {
        self.batches.keys().copied().collect()
    }

    pub fn latest_batch(&self, period: PeriodId) -> Option<&PeriodBatch> {
        self.batches
            .get(&period)
            .and_then(|entries| entries.last())
            .map(|e| &e.batch)
    }

    pub fn batch_history(&self, period: PeriodId) -> &[BatchEntry] {
        self.batches.get(&period).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Current transactions: those of each period's latest batch, in period order
    pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.batches
            .values()
            .filter_map(|entries| entries.last())
            .flat_map(|e| e.batch.transactions.iter())
    }

    /// Adapter-stage quarantine of each period's latest batch
    pub fn quarantined(&self) -> impl Iterator<Item = &Quarantined> {
        self.batches
            .values()
            .filter_map(|entries| entries.last())
            .flat_map(|e| e.batch.quarantined.iter())
    }
}
