// 🧑‍⚖️ Manual Review - the queue and the operator's instructions
//
// Needs-review and conflicting candidates wait here for an external operator.
// Decisions arrive as JSON and are applied by the pipeline; an item left open
// for a long time is reported as stale, never treated as a failure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConsolidationError, RecordError, Result};
use crate::matcher::MatchCandidate;
use crate::records::{CandidateId, RecordKey};

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Accept,
    Reject,
    OverrideConflict,

    /// Records (`kind:period:local_id`) to move out of their master
    Split { records: Vec<String> },
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Accept => "accept",
            ReviewAction::Reject => "reject",
            ReviewAction::OverrideConflict => "override_conflict",
            ReviewAction::Split { .. } => "split",
        }
    }
}

/// One operator instruction
///
/// ```json
/// {"candidate_id": "9f2c…", "action": "accept", "operator": "jdoe"}
/// {"action": "split", "records": ["company:2008Q1:0000000007"], "operator": "jdoe"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    #[serde(default)]
    pub candidate_id: Option<CandidateId>,

    #[serde(flatten)]
    pub action: ReviewAction,

    pub operator: String,

    #[serde(default)]
    pub note: Option<String>,
}

impl ReviewDecision {
    /// Structural checks before anything is applied
    pub fn validate(&self) -> Result<()> {
        if self.operator.trim().is_empty() {
            return Err(ConsolidationError::InvalidDecision("operator is required".to_string()));
        }
        match &self.action {
            ReviewAction::Split { records } => {
                if records.is_empty() {
                    return Err(ConsolidationError::InvalidDecision(
                        "split needs at least one record".to_string(),
                    ));
                }
                self.split_keys().map(|_| ())
            }
            _ if self.candidate_id.is_none() => Err(ConsolidationError::InvalidDecision(format!(
                "{} needs a candidate_id",
                self.action.as_str()
            ))),
            _ => Ok(()),
        }
    }

    pub fn split_keys(&self) -> Result<Vec<RecordKey>> {
        match &self.action {
            ReviewAction::Split { records } => records.iter().map(|r| r.parse()).collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn note_or_default(&self) -> String {
        self.note
            .clone()
            .unwrap_or_else(|| format!("operator {}", self.action.as_str()))
    }
}

/// Load decisions from a JSON file holding one decision or an array
pub fn load_decisions(path: impl AsRef<Path>) -> Result<Vec<ReviewDecision>> {
    let content = std::fs::read_to_string(path)?;
    parse_decisions(&content)
}

pub fn parse_decisions(content: &str) -> Result<Vec<ReviewDecision>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let decisions: Vec<ReviewDecision> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    for decision in &decisions {
        decision.validate()?;
    }
    Ok(decisions)
}

// ============================================================================
// QUEUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub candidate: MatchCandidate,

    /// AMBIGUOUS_MATCH or CONFLICT
    pub reason: RecordError,
    pub queued_at: DateTime<Utc>,
}

impl ReviewItem {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.queued_at
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReviewQueue {
    items: BTreeMap<CandidateId, ReviewItem>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue (or refresh) an item; an already-queued item keeps its age
    pub fn enqueue(&mut self, candidate: MatchCandidate, reason: RecordError, now: DateTime<Utc>) -> &ReviewItem {
        let item = self.items.entry(candidate.id.clone()).or_insert_with(|| ReviewItem {
            candidate: candidate.clone(),
            reason: reason.clone(),
            queued_at: now,
        });
        item.candidate = candidate;
        item.reason = reason;
        item
    }

    pub fn remove(&mut self, id: &CandidateId) -> Option<ReviewItem> {
        self.items.remove(id)
    }

    pub fn get(&self, id: &CandidateId) -> Option<&ReviewItem> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Open items, oldest first
    pub fn items(&self) -> Vec<&ReviewItem> {
        let mut items: Vec<&ReviewItem> = self.items.values().collect();
        items.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.candidate.id.cmp(&b.candidate.id)));
        items
    }

    /// Items open longer than `max_age_days`
    pub fn stale(&self, now: DateTime<Utc>, max_age_days: i64) -> Vec<&ReviewItem> {
        let limit = Duration::days(max_age_days);
        self.items().into_iter().filter(|i| i.age(now) > limit).collect()
    }

    pub fn conflicts(&self) -> usize {
        self.items
            .values()
            .filter(|i| matches!(i.reason, RecordError::Conflict { .. }))
            .count()
    }
}
