// 📜 Audit Trail - every change is an event
//
// Events are appended, never updated. Each one names the entity it touches
// (a master, a candidate, a period) so history can be replayed per entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchCandidate;
use crate::period_store::IngestOutcome;
use crate::records::Quarantined;
use crate::registry::CommitRecord;

pub const ENTITY_MASTER: &str = "master";
pub const ENTITY_CANDIDATE: &str = "candidate";
pub const ENTITY_PERIOD: &str = "period";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    /// One event per registry commit, carrying evidence and membership diff
    pub fn from_commit(commit: &CommitRecord) -> Self {
        let actor = commit
            .evidence
            .iter()
            .map(|e| e.actor.as_str())
            .find(|a| *a != "matcher")
            .unwrap_or("matcher");
        let mut event = Self::new(
            &format!("master_{}", commit.kind.as_str()),
            ENTITY_MASTER,
            commit.master_id.as_str(),
            serde_json::json!({
                "commit_id": commit.commit_id,
                "version": commit.version,
                "evidence": commit.evidence,
                "added": commit.added,
                "removed": commit.removed,
                "members_before": commit.members_before,
                "members_after": commit.members_after,
            }),
            actor,
        );
        event.timestamp = commit.committed_at;
        event
    }

    pub fn from_ingest(outcome: &IngestOutcome, actor: &str) -> Self {
        Self::new(
            "period_ingested",
            ENTITY_PERIOD,
            &outcome.period.to_string(),
            serde_json::json!({
                "digest": outcome.digest,
                "status": outcome.status,
                "added": outcome.added.len(),
                "revised": outcome.revised.len(),
                "transactions": outcome.transactions,
                "quarantined": outcome.quarantined,
                "duplicates": outcome.duplicates,
            }),
            actor,
        )
    }

    /// Candidate disposition change (automatic or operator)
    pub fn from_candidate(event_type: &str, candidate: &MatchCandidate) -> Self {
        Self::new(
            event_type,
            ENTITY_CANDIDATE,
            candidate.id.as_str(),
            serde_json::json!({
                "left": candidate.left,
                "right": candidate.right,
                "score": candidate.score,
                "disposition": candidate.disposition,
                "reason": candidate.reason,
            }),
            candidate.decided_by.as_deref().unwrap_or("matcher"),
        )
    }

    pub fn from_quarantine(item: &Quarantined) -> Self {
        Self::new(
            "record_quarantined",
            ENTITY_PERIOD,
            &item.period.to_string(),
            serde_json::json!({
                "stage": item.stage,
                "source": item.source,
                "reason": item.reason_code(),
                "error": item.error,
            }),
            item.stage.as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period_store::IngestStatus;
    use crate::temporal::PeriodId;

    #[test]
    fn test_ingest_event_shape() {
        let outcome = IngestOutcome {
            period: PeriodId::quarter(2006, 1).unwrap(),
            digest: "abc".to_string(),
            status: IngestStatus::New,
            added: vec![0, 1],
            revised: vec![],
            transactions: 3,
            quarantined: 1,
            duplicates: 2,
        };
        let event = AuditEvent::from_ingest(&outcome, "cli");

        assert_eq!(event.event_type, "period_ingested");
        assert_eq!(event.entity_id, "2006Q1");
        assert_eq!(event.data["added"], 2);
        assert_eq!(event.data["status"], "new");
        assert_eq!(event.data["duplicates"], 2);
        assert_eq!(event.event_id.len(), 36);
        println!("✅ Ingest audit event PASSED");
    }
}
