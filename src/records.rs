// 🗂️ Canonical Records - what every Period Adapter must produce
//
// PeriodRecord: one company or insider as seen by one period, still carrying
// its period-local identifier. Immutable once built.
// TransactionRecord: one Form 4 style trade referencing period-local ids.
// MasterId / CandidateId: stable identifiers derived deterministically.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::RecordError;
use crate::temporal::PeriodId;

/// Arena index of a PeriodRecord revision inside the Period Store
pub type RecordId = u32;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Insider,
}

impl EntityKind {
    /// Prefix used on master identifiers
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Company => "MC",
            EntityKind::Insider => "MI",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Insider => "insider",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECORD KEY
// ============================================================================

/// RecordKey - identity of a PeriodRecord: (kind, period, normalized local id)
///
/// A later ingestion of the same period may produce a new revision under the
/// same key; the key itself never changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub period: PeriodId,
    pub local_id: String,
}

impl RecordKey {
    pub fn new(kind: EntityKind, period: PeriodId, local_id: impl Into<String>) -> Self {
        RecordKey {
            kind,
            period,
            local_id: local_id.into(),
        }
    }

    pub fn company(period: PeriodId, local_id: impl Into<String>) -> Self {
        RecordKey::new(EntityKind::Company, period, local_id)
    }

    pub fn insider(period: PeriodId, local_id: impl Into<String>) -> Self {
        RecordKey::new(EntityKind::Insider, period, local_id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.period, self.local_id)
    }
}

/// Parses the `kind:period:local_id` form produced by Display
impl std::str::FromStr for RecordKey {
    type Err = crate::error::ConsolidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::error::ConsolidationError::UnknownRecord(s.to_string());
        let mut parts = s.trim().splitn(3, ':');
        let kind = match parts.next().map(|p| p.to_ascii_lowercase()).as_deref() {
            Some("company") => EntityKind::Company,
            Some("insider") => EntityKind::Insider,
            _ => return Err(invalid()),
        };
        let period: PeriodId = parts.next().ok_or_else(invalid)?.parse()?;
        let local_id = parts.next().filter(|id| !id.is_empty()).ok_or_else(invalid)?;
        Ok(RecordKey::new(kind, period, local_id))
    }
}

// ============================================================================
// INSIDER ROLES & LISTING STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleFlags {
    pub director: bool,
    pub officer: bool,
    pub ten_percent_owner: bool,
    pub other: bool,
}

impl RoleFlags {
    /// Parse a free-text relationship such as "Director, Officer, 10% Owner"
    pub fn from_relationship(text: &str) -> Self {
        let lower = text.to_lowercase();
        RoleFlags {
            director: lower.contains("director"),
            officer: lower.contains("officer"),
            ten_percent_owner: lower.contains("10%") || lower.contains("tenpercent") || lower.contains("ten percent"),
            other: lower.contains("other"),
        }
    }

    pub fn any(&self) -> bool {
        self.director || self.officer || self.ten_percent_owner || self.other
    }

    pub fn union(&self, other: &RoleFlags) -> RoleFlags {
        RoleFlags {
            director: self.director || other.director,
            officer: self.officer || other.officer,
            ten_percent_owner: self.ten_percent_owner || other.ten_percent_owner,
            other: self.other || other.other,
        }
    }

    fn bits(&self) -> [bool; 4] {
        [self.director, self.officer, self.ten_percent_owner, self.other]
    }

    /// Jaccard overlap of the two flag sets; None when both are empty
    pub fn jaccard(&self, other: &RoleFlags) -> Option<f64> {
        let (a, b) = (self.bits(), other.bits());
        let union = a.iter().zip(b.iter()).filter(|(x, y)| **x || **y).count();
        if union == 0 {
            return None;
        }
        let intersection = a.iter().zip(b.iter()).filter(|(x, y)| **x && **y).count();
        Some(intersection as f64 / union as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Explicitly listed (or relisted) in this period
    Listed,

    /// Explicitly delisted in this period
    Delisted,

    /// The period's layout says nothing about listing
    #[default]
    Unknown,
}

impl ListingStatus {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "DELISTED" | "INACTIVE" | "D" => ListingStatus::Delisted,
            "LISTED" | "RELISTED" | "ACTIVE" | "A" => ListingStatus::Listed,
            _ => ListingStatus::Unknown,
        }
    }
}

// ============================================================================
// PERIOD RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetail {
    Company {
        ticker: Option<String>,
        status: ListingStatus,
    },
    Insider {
        roles: RoleFlags,
        title: Option<String>,
    },
}

/// PeriodRecord - one company or insider as reported by one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub key: RecordKey,

    /// Identifier exactly as the period reported it (before padding)
    pub raw_local_id: String,

    /// Display name as reported
    pub name: String,

    pub detail: RecordDetail,

    /// Which adapter shape produced this record
    pub source_tag: String,
}

impl PeriodRecord {
    pub fn kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn period(&self) -> PeriodId {
        self.key.period
    }

    pub fn ticker(&self) -> Option<&str> {
        match &self.detail {
            RecordDetail::Company { ticker, .. } => ticker.as_deref(),
            RecordDetail::Insider { .. } => None,
        }
    }

    pub fn listing_status(&self) -> ListingStatus {
        match &self.detail {
            RecordDetail::Company { status, .. } => *status,
            RecordDetail::Insider { .. } => ListingStatus::Unknown,
        }
    }

    pub fn roles(&self) -> Option<&RoleFlags> {
        match &self.detail {
            RecordDetail::Insider { roles, .. } => Some(roles),
            RecordDetail::Company { .. } => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match &self.detail {
            RecordDetail::Insider { title, .. } => title.as_deref(),
            RecordDetail::Company { .. } => None,
        }
    }
}

// ============================================================================
// TRANSACTION RECORD
// ============================================================================

/// TransactionRecord - a trade referencing period-local identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Fingerprint (SHA-256) of the filing reference plus the business fields
    pub id: String,

    pub period: PeriodId,
    pub company_local_id: String,
    pub insider_local_id: String,
    pub transaction_date: NaiveDate,
    pub transaction_code: String,
    pub shares: f64,
    pub price: Option<f64>,

    /// shares × price when a price is present
    pub value: Option<f64>,

    pub acquired_disposed: Option<String>,
    pub source_tag: String,

    /// Accession number, or `TABLE line N` for layouts without one
    #[serde(default)]
    pub filing_ref: String,
}

impl TransactionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        period: PeriodId,
        company_local_id: String,
        insider_local_id: String,
        transaction_date: NaiveDate,
        transaction_code: String,
        shares: f64,
        price: Option<f64>,
        acquired_disposed: Option<String>,
        source_tag: String,
        filing_ref: String,
    ) -> Self {
        let value = price.map(|p| shares * p);
        let mut record = TransactionRecord {
            id: String::new(),
            period,
            company_local_id,
            insider_local_id,
            transaction_date,
            transaction_code,
            shares,
            price,
            value,
            acquired_disposed,
            source_tag,
            filing_ref,
        };
        record.id = record.compute_fingerprint();
        record
    }

    /// Two filings reporting the same trade hash apart; only a re-read of
    /// the same filing row hashes equal
    pub fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.filing_ref.as_bytes());
        hasher.update(b"|");
        hasher.update(self.period.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.company_local_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.insider_local_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.transaction_date.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.transaction_code.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:.6}", self.shares).as_bytes());
        hasher.update(b"|");
        if let Some(price) = self.price {
            hasher.update(format!("{:.6}", price).as_bytes());
        }
        hasher.update(b"|");
        hasher.update(self.acquired_disposed.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn company_key(&self) -> RecordKey {
        RecordKey::company(self.period, self.company_local_id.clone())
    }

    pub fn insider_key(&self) -> RecordKey {
        RecordKey::insider(self.period, self.insider_local_id.clone())
    }
}

/// A transaction rewritten to carry master identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedTransaction {
    #[serde(flatten)]
    pub record: TransactionRecord,
    pub master_company_id: MasterId,
    pub master_insider_id: MasterId,
}

// ============================================================================
// STABLE IDENTIFIERS
// ============================================================================

/// MasterId - permanent, period-independent identifier ("MC-…" / "MI-…")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterId(String);

impl MasterId {
    /// Deterministic id from a seed string
    pub fn derive(kind: EntityKind, seed: &str) -> Self {
        let uuid = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, seed.as_bytes());
        MasterId(format!("{}-{}", kind.prefix(), uuid))
    }

    /// Id of the master founded by a record
    pub fn for_founder(key: &RecordKey) -> Self {
        MasterId::derive(key.kind, &key.to_string())
    }

    /// Id of the master spawned by splitting `parent` at `version`
    pub fn for_split(kind: EntityKind, parent: &MasterId, version: u64) -> Self {
        MasterId::derive(kind, &format!("split:{}:{}", parent, version))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        MasterId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Option<EntityKind> {
        if self.0.starts_with("MC-") {
            Some(EntityKind::Company)
        } else if self.0.starts_with("MI-") {
            Some(EntityKind::Insider)
        } else {
            None
        }
    }
}

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CandidateId - SHA-256 over the ordered pair of record keys
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn for_pair(a: &RecordKey, b: &RecordKey) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha256::new();
        hasher.update(first.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(second.to_string().as_bytes());
        CandidateId(format!("{:x}", hasher.finalize()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        CandidateId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs and terminal output
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// QUARANTINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStage {
    Adapter,
    Linker,
}

impl QuarantineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineStage::Adapter => "adapter",
            QuarantineStage::Linker => "linker",
        }
    }
}

/// A record set aside with its reason; never dropped silently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quarantined {
    pub stage: QuarantineStage,
    pub period: PeriodId,

    /// Where it came from ("FORM345 row 17", a transaction fingerprint, ...)
    pub source: String,

    pub error: RecordError,
}

impl Quarantined {
    pub fn reason_code(&self) -> &'static str {
        self.error.reason_code()
    }
}

// ============================================================================
// TESTS
// ============================================================================
