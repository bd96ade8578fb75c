// ⚠️ Error Taxonomy
//
// RecordError: scoped to one record or candidate. Never aborts a run; the
// record is quarantined or the candidate routed to review.
// ConsolidationError: scoped to an operation (one period's ingestion, one
// review decision, one lookup). SchemaDrift fails that period only.

use serde::{Deserialize, Serialize};

use crate::records::{CandidateId, EntityKind, MasterId};
use crate::temporal::PeriodId;

pub type Result<T> = std::result::Result<T, ConsolidationError>;

// ============================================================================
// RECORD-SCOPED ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum RecordError {
    /// Malformed numeric/date/identifier field; the record is quarantined
    #[error("data quality: {field} = {value:?} ({detail})")]
    DataQuality {
        field: String,
        value: String,
        detail: String,
    },

    /// A transaction references a local id that has no alias mapping
    #[error("unresolved {kind} reference {local_id} in {period}")]
    UnresolvedReference {
        kind: EntityKind,
        period: PeriodId,
        local_id: String,
    },

    /// Score fell in the review band
    #[error("candidate {candidate} scored {score:.3}, needs review")]
    AmbiguousMatch { candidate: CandidateId, score: f64 },

    /// A merge would unify two established masters
    #[error("merge would unify distinct masters {left} and {right}")]
    Conflict {
        left: MasterId,
        right: MasterId,
        candidate: Option<CandidateId>,
    },
}

impl RecordError {
    pub fn data_quality(field: &str, value: &str, detail: impl Into<String>) -> Self {
        RecordError::DataQuality {
            field: field.to_string(),
            value: value.to_string(),
            detail: detail.into(),
        }
    }

    /// Stable code used in quarantine rows and run summaries
    pub fn reason_code(&self) -> &'static str {
        match self {
            RecordError::DataQuality { .. } => "DATA_QUALITY",
            RecordError::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            RecordError::AmbiguousMatch { .. } => "AMBIGUOUS_MATCH",
            RecordError::Conflict { .. } => "CONFLICT",
        }
    }
}

// ============================================================================
// OPERATION-SCOPED ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    /// Layout matches no registered adapter; fatal for this period only
    #[error("schema drift in {period}: layout {signature} matches no adapter (declared {declared:?}, columns {columns:?})")]
    SchemaDrift {
        period: PeriodId,
        signature: String,
        columns: Vec<String>,
        declared: Option<String>,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("unknown candidate: {0}")]
    UnknownCandidate(String),

    #[error("unknown master: {0}")]
    UnknownMaster(String),

    #[error("unknown record: {0}")]
    UnknownRecord(String),

    #[error("alias {query} resolves to several masters: {masters:?}")]
    AmbiguousAlias {
        query: String,
        masters: Vec<MasterId>,
    },

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid review decision: {0}")]
    InvalidDecision(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsolidationError {
    pub fn is_schema_drift(&self) -> bool {
        matches!(self, ConsolidationError::SchemaDrift { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ConsolidationError::Record(RecordError::Conflict { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let dq = RecordError::data_quality("TRANS_DATE", "31-FOO-2006", "unparseable date");
        assert_eq!(dq.reason_code(), "DATA_QUALITY");

        let unresolved = RecordError::UnresolvedReference {
            kind: EntityKind::Insider,
            period: PeriodId::Legacy,
            local_id: "0000000042".into(),
        };
        assert_eq!(unresolved.reason_code(), "UNRESOLVED_REFERENCE");
        assert!(unresolved.to_string().contains("0000000042"));
    }

    #[test]
    fn test_record_error_serializes_with_tag() {
        let err = RecordError::data_quality("TRANS_SHARES", "abc", "not a number");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_kind"], "data_quality");

        let back: RecordError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_conflict_is_detected_through_wrapper() {
        let err: ConsolidationError = RecordError::Conflict {
            left: MasterId::from_raw("MC-a"),
            right: MasterId::from_raw("MC-b"),
            candidate: None,
        }
        .into();
        assert!(err.is_conflict());
        assert!(!err.is_schema_drift());
    }
}
