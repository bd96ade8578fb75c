// Filing Consolidator - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod temporal;     // Periods and validity intervals
pub mod error;        // Record-level and operation-scoped errors
pub mod records;      // Period records, keys, identifiers
pub mod config;       // TOML configuration
pub mod normalize;    // Name, identifier, ticker normalization
pub mod quality;      // Field-level data quality checks
pub mod adapter;      // Schema adapters per layout generation
pub mod period_store; // Immutable per-period batches
pub mod matcher;      // Blocking, scoring, dispositions
pub mod union_find;   // Equivalence classes
pub mod registry;     // Versioned master entities + AliasMapping
pub mod resolution;   // Accepted candidates → master commits
pub mod review;       // Manual review queue and decisions
pub mod linker;       // Transactions → master identities
pub mod view;         // Consolidated history + CSV export
pub mod audit;        // Audit events
pub mod db;           // SQLite persistence
pub mod pipeline;     // Consolidator orchestration

// Re-export commonly used types
pub use adapter::{AdapterRegistry, PeriodAdapter, PeriodBatch, RawExtract, RawTable, SchemaShape};
pub use audit::AuditEvent;
pub use config::ConsolidatorConfig;
pub use error::{ConsolidationError, RecordError, Result};
pub use linker::{LinkReport, TransactionLinker};
pub use matcher::{CandidateBook, CandidateMatcher, Disposition, MatchCandidate, ScoreVector};
pub use normalize::NameNormalizer;
pub use period_store::{IngestOutcome, IngestStatus, PeriodStore};
pub use pipeline::{Consolidator, MasterHistory, PeriodFailure, ReviewOutcome, RunSummary};
pub use records::{
    CandidateId, EntityKind, LinkedTransaction, MasterId, PeriodRecord, Quarantined, RecordKey, TransactionRecord,
};
pub use registry::{AliasQuery, CommitRecord, MasterEntity, MasterRegistry, Resolution};
pub use resolution::ResolutionEngine;
pub use review::{load_decisions, ReviewAction, ReviewDecision, ReviewItem, ReviewQueue};
pub use temporal::{PeriodId, ValidityInterval};
pub use view::{ConsolidatedTransaction, ConsolidatedView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
