// 🔍 Candidate Matcher - blocking, then scoring
//
// Stage 1 (blocking): bucket records on cheap keys
//   - period-local identifier (exact, across periods)
//   - normalized name (case-folded, punctuation and corporate suffixes gone)
//   - ticker (companies only)
// Stage 2 (scoring): only records sharing a bucket are compared.
//
// Buckets are independent, so both stages fan out with rayon; the output is
// sorted by candidate id and never depends on thread scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{MatchingConfig, ScoreWeights};
use crate::error::{ConsolidationError, Result};
use crate::normalize::{name_similarity, strip_padding, NameNormalizer};
use crate::period_store::PeriodStore;
use crate::records::{CandidateId, EntityKind, ListingStatus, PeriodRecord, RecordId, RecordKey};

// ============================================================================
// BLOCKING KEYS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockingKey {
    LocalId(EntityKind, String),
    Name(EntityKind, String),
    Ticker(String),
}

// ============================================================================
// SCORES & DISPOSITION
// ============================================================================

/// Per-pair similarity, every component in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    /// Edit-distance similarity of normalized names
    pub name: f64,

    /// 1.0 exact, 0.9 equal after padding normalization, 0.5 prefix, else 0
    pub identifier: f64,

    /// Companies: ticker agreement. Insiders: role/title overlap
    pub overlap: f64,

    /// 0.0 when the two periods contradict each other
    pub temporal: f64,
}

impl ScoreVector {
    /// Weighted mean of the components
    pub fn total(&self, weights: &ScoreWeights) -> f64 {
        let sum = weights.sum();
        if sum <= 0.0 {
            return 0.0;
        }
        (self.name * weights.name
            + self.identifier * weights.identifier
            + self.overlap * weights.overlap
            + self.temporal * weights.temporal)
            / sum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Pending,
    Accepted,
    Rejected,
    NeedsReview,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Pending => "pending",
            Disposition::Accepted => "accepted",
            Disposition::Rejected => "rejected",
            Disposition::NeedsReview => "needs_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Disposition::Pending),
            "accepted" => Some(Disposition::Accepted),
            "rejected" => Some(Disposition::Rejected),
            "needs_review" => Some(Disposition::NeedsReview),
            _ => None,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MATCH CANDIDATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: CandidateId,

    /// Always the smaller key of the pair
    pub left: RecordKey,
    pub right: RecordKey,

    pub kind: EntityKind,
    pub scores: ScoreVector,
    pub score: f64,
    pub disposition: Disposition,

    /// Human-readable reason for the disposition
    pub reason: String,

    /// Operator who decided it; None for matcher decisions
    pub decided_by: Option<String>,
}

impl MatchCandidate {
    pub fn new(a: &RecordKey, b: &RecordKey, scores: ScoreVector, score: f64) -> Self {
        let (left, right) = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        MatchCandidate {
            id: CandidateId::for_pair(&left, &right),
            kind: left.kind,
            left,
            right,
            scores,
            score,
            disposition: Disposition::Pending,
            reason: String::new(),
            decided_by: None,
        }
    }

    pub fn is_operator_decided(&self) -> bool {
        self.decided_by.is_some()
    }
}

// ============================================================================
// CANDIDATE MATCHER
// ============================================================================

pub struct CandidateMatcher {
    config: MatchingConfig,
    normalizer: NameNormalizer,
}

impl CandidateMatcher {
    pub fn new(config: MatchingConfig, normalizer: NameNormalizer) -> Self {
        CandidateMatcher { config, normalizer }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn blocking_keys(&self, record: &PeriodRecord) -> Vec<BlockingKey> {
        let kind = record.kind();
        let mut keys = vec![BlockingKey::LocalId(kind, record.key.local_id.clone())];

        let name = self.normalizer.normalize(kind, &record.name);
        if !name.is_empty() {
            keys.push(BlockingKey::Name(kind, name));
        }
        if let Some(ticker) = record.ticker() {
            keys.push(BlockingKey::Ticker(ticker.to_string()));
        }
        keys
    }

    /// Propose candidates for every pair that shares a bucket and touches `focus`
    ///
    /// `focus` is the set of new/revised records; pairs between two untouched
    /// records were already decided on an earlier run.
    pub fn propose(&self, store: &PeriodStore, focus: &[RecordId]) -> Vec<MatchCandidate> {
        if focus.is_empty() {
            return Vec::new();
        }
        let focus: HashSet<RecordId> = focus.iter().copied().collect();

        let mut buckets: HashMap<BlockingKey, Vec<RecordId>> = HashMap::new();
        for (id, record) in store.records() {
            for key in self.blocking_keys(record) {
                buckets.entry(key).or_default().push(id);
            }
        }

        let max_bucket = self.config.max_bucket_size;
        let pairs: BTreeSet<(RecordId, RecordId)> = buckets
            .par_iter()
            .filter(|(_, members)| members.len() > 1 && members.iter().any(|m| focus.contains(m)))
            .filter(|(key, members)| {
                if members.len() > max_bucket {
                    warn!(?key, size = members.len(), "blocking bucket over cap, skipped");
                    return false;
                }
                true
            })
            .flat_map_iter(|(_, members)| {
                let mut local = Vec::new();
                for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        if focus.contains(&a) || focus.contains(&b) {
                            local.push(if a < b { (a, b) } else { (b, a) });
                        }
                    }
                }
                local
            })
            .collect();

        let mut candidates: Vec<MatchCandidate> = pairs
            .par_iter()
            .filter_map(|&(a, b)| {
                let (left, right) = (store.get(a)?, store.get(b)?);
                Some(self.evaluate(left, right))
            })
            .collect();

        candidates.sort_by(|x, y| x.id.cmp(&y.id));
        debug!(pairs = candidates.len(), focus = focus.len(), "candidate pairs scored");
        candidates
    }

    /// Score a pair and assign its disposition
    pub fn evaluate(&self, a: &PeriodRecord, b: &PeriodRecord) -> MatchCandidate {
        let scores = self.score_pair(a, b);
        let score = scores.total(&self.config.weights);
        let mut candidate = MatchCandidate::new(&a.key, &b.key, scores, score);
        let (disposition, reason) = self.dispose(&scores, score);
        candidate.disposition = disposition;
        candidate.reason = reason;
        candidate
    }

    pub fn score_pair(&self, a: &PeriodRecord, b: &PeriodRecord) -> ScoreVector {
        let kind = a.kind();
        let name = name_similarity(
            &self.normalizer.normalize(kind, &a.name),
            &self.normalizer.normalize(kind, &b.name),
        );

        ScoreVector {
            name,
            identifier: self.identifier_score(a, b),
            overlap: overlap_score(a, b),
            temporal: temporal_score(a, b),
        }
    }

    fn identifier_score(&self, a: &PeriodRecord, b: &PeriodRecord) -> f64 {
        if a.raw_local_id.trim() == b.raw_local_id.trim() {
            return 1.0;
        }
        if a.key.local_id == b.key.local_id {
            return 0.9;
        }
        let (x, y) = (strip_padding(&a.key.local_id), strip_padding(&b.key.local_id));
        let shorter = x.len().min(y.len());
        if shorter >= self.config.min_identifier_prefix && (x.starts_with(y) || y.starts_with(x)) {
            return 0.5;
        }
        0.0
    }

    pub fn dispose(&self, scores: &ScoreVector, score: f64) -> (Disposition, String) {
        if scores.temporal == 0.0 {
            return (
                Disposition::Rejected,
                "temporal contradiction: identifier reappears after delisting".to_string(),
            );
        }
        // Both watermarks belong to the review band
        if score > self.config.high_watermark {
            (Disposition::Accepted, format!("score {:.3} > {:.2}", score, self.config.high_watermark))
        } else if score < self.config.low_watermark {
            (Disposition::Rejected, format!("score {:.3} < {:.2}", score, self.config.low_watermark))
        } else {
            (Disposition::NeedsReview, format!("score {:.3} in review band", score))
        }
    }
}

fn overlap_score(a: &PeriodRecord, b: &PeriodRecord) -> f64 {
    match (a.kind(), a.ticker(), b.ticker()) {
        (EntityKind::Company, Some(x), Some(y)) => {
            if x == y {
                1.0
            } else {
                0.0
            }
        }
        (EntityKind::Company, _, _) => 0.5,
        (EntityKind::Insider, _, _) => {
            let (roles_a, roles_b) = match (a.roles(), b.roles()) {
                (Some(x), Some(y)) => (x, y),
                _ => return 0.5,
            };
            let Some(roles) = roles_a.jaccard(roles_b) else {
                return 0.5;
            };
            let title = match (a.title(), b.title()) {
                (Some(x), Some(y)) if x.trim().eq_ignore_ascii_case(y.trim()) => 1.0,
                _ => 0.0,
            };
            0.7 * roles + 0.3 * title
        }
    }
}

fn temporal_score(a: &PeriodRecord, b: &PeriodRecord) -> f64 {
    if a.period() == b.period() {
        // Two identifiers inside one period: possible, but weak
        return 0.3;
    }
    let (earlier, later) = if a.period() < b.period() { (a, b) } else { (b, a) };
    let same_identifier = earlier.key.local_id == later.key.local_id;
    if same_identifier
        && earlier.listing_status() == ListingStatus::Delisted
        && later.listing_status() != ListingStatus::Listed
    {
        return 0.0;
    }
    1.0
}

// ============================================================================
// CANDIDATE BOOK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
    Unchanged,

    /// An operator already decided this pair; the matcher does not override
    OperatorKept,
}

/// Every candidate ever proposed, keyed by id
#[derive(Debug, Default, Clone)]
pub struct CandidateBook {
    candidates: BTreeMap<CandidateId, MatchCandidate>,
}

impl CandidateBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, candidate: MatchCandidate) -> UpsertOutcome {
        match self.candidates.get_mut(&candidate.id) {
            None => {
                self.candidates.insert(candidate.id.clone(), candidate);
                UpsertOutcome::New
            }
            Some(existing) if existing.is_operator_decided() => UpsertOutcome::OperatorKept,
            Some(existing) if *existing == candidate => UpsertOutcome::Unchanged,
            Some(existing) => {
                *existing = candidate;
                UpsertOutcome::Updated
            }
        }
    }

    /// Insert as-is, used when restoring persisted state
    pub fn restore(&mut self, candidate: MatchCandidate) {
        self.candidates.insert(candidate.id.clone(), candidate);
    }

    pub fn get(&self, id: &CandidateId) -> Option<&MatchCandidate> {
        self.candidates.get(id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchCandidate> {
        self.candidates.values()
    }

    pub fn by_disposition(&self, disposition: Disposition) -> Vec<&MatchCandidate> {
        self.candidates
            .values()
            .filter(|c| c.disposition == disposition)
            .collect()
    }

    /// Accepted candidates, strongest first, ties by id
    pub fn accepted(&self) -> Vec<MatchCandidate> {
        let mut accepted: Vec<MatchCandidate> =
            self.by_disposition(Disposition::Accepted).into_iter().cloned().collect();
        accepted.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        accepted
    }

    /// Record a disposition change; `operator` marks it as a human decision
    pub fn decide(
        &mut self,
        id: &CandidateId,
        disposition: Disposition,
        reason: impl Into<String>,
        operator: Option<String>,
    ) -> Result<&MatchCandidate> {
        let candidate = self
            .candidates
            .get_mut(id)
            .ok_or_else(|| ConsolidationError::UnknownCandidate(id.to_string()))?;
        candidate.disposition = disposition;
        candidate.reason = reason.into();
        if operator.is_some() {
            candidate.decided_by = operator;
        }
        Ok(candidate)
    }

    pub fn counts(&self) -> BTreeMap<Disposition, usize> {
        let mut counts = BTreeMap::new();
        for c in self.candidates.values() {
            *counts.entry(c.disposition).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================================
// TESTS
// ============================================================================
