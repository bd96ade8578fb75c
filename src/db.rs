// 💾 Persistence - SQLite tables behind the consolidator
//
// Append-only where history matters (period_batches, master_versions,
// events); current-state tables (alias_mapping, candidates, quarantine) are
// upserted. The commits of one operation land in one SQLite transaction.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;

use crate::adapter::PeriodBatch;
use crate::audit::AuditEvent;
use crate::error::{RecordError, Result};
use crate::matcher::MatchCandidate;
use crate::records::{MasterId, QuarantineStage, Quarantined, RecordKey};
use crate::registry::{CommitRecord, MasterEntity};
use crate::review::ReviewDecision;
use crate::temporal::PeriodId;

pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Period batches (adapter output, replayed in order on startup)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS period_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            period TEXT NOT NULL,
            digest TEXT NOT NULL,
            shape TEXT NOT NULL,
            adapter_version TEXT NOT NULL,
            layout_signature TEXT NOT NULL,
            payload TEXT NOT NULL,
            ingested_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Master versions (every version ever committed)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS master_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            master_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            kind TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            canonical_ticker TEXT,
            payload TEXT NOT NULL,
            system_time TEXT NOT NULL,
            UNIQUE(master_id, version)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alias_mapping (
            record_key TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            period TEXT NOT NULL,
            local_id TEXT NOT NULL,
            master_id TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidates (
            candidate_id TEXT PRIMARY KEY,
            left_key TEXT NOT NULL,
            right_key TEXT NOT NULL,
            kind TEXT NOT NULL,
            score REAL NOT NULL,
            disposition TEXT NOT NULL,
            decided_by TEXT,
            payload TEXT NOT NULL,
            review_reason TEXT,
            queued_at TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            candidate_id TEXT,
            action TEXT NOT NULL,
            operator TEXT NOT NULL,
            payload TEXT NOT NULL,
            outcome TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quarantine (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stage TEXT NOT NULL,
            period TEXT NOT NULL,
            source TEXT NOT NULL,
            reason_code TEXT NOT NULL,
            payload TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail / event sourcing)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_period ON period_batches(period)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alias_master ON alias_mapping(master_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidates_disposition ON candidates(disposition)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

fn json_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// PERIOD BATCHES
// ============================================================================

pub fn insert_batch(conn: &Connection, batch: &PeriodBatch, digest: &str) -> Result<i64> {
    let payload = serde_json::to_string(batch)?;
    conn.execute(
        "INSERT INTO period_batches (
            period, digest, shape, adapter_version, layout_signature, payload, ingested_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            batch.period.to_string(),
            digest,
            batch.shape.tag(),
            batch.adapter_version,
            batch.layout_signature,
            payload,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Every persisted batch in ingestion order
pub fn load_batches(conn: &Connection) -> Result<Vec<PeriodBatch>> {
    let mut stmt = conn.prepare("SELECT payload FROM period_batches ORDER BY id ASC")?;
    let batches = stmt
        .query_map([], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str(&payload).map_err(|e| json_error(0, e))
        })?
        .collect::<rusqlite::Result<Vec<PeriodBatch>>>()?;
    Ok(batches)
}

// ============================================================================
// MASTERS & ALIAS MAPPING
// ============================================================================

fn insert_master_version(conn: &Connection, master: &MasterEntity) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO master_versions (
            master_id, version, kind, canonical_name, canonical_ticker, payload, system_time
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            master.id.as_str(),
            master.version as i64,
            master.kind.as_str(),
            master.canonical_name,
            master.canonical_ticker,
            serde_json::to_string(master)?,
            master.system_time.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Every commit of one operation in a single transaction
///
/// A merge writes the survivor and the absorbed master together, a split the
/// parent and its spawn; nothing is written if any of them fails.
pub fn persist_commits(conn: &mut Connection, commits: &[CommitRecord]) -> Result<()> {
    let tx = conn.transaction()?;
    for commit in commits {
        write_commit(&tx, commit)?;
    }
    tx.commit()?;
    Ok(())
}

/// Master version + alias mapping rows + audit event
fn write_commit(tx: &Connection, commit: &CommitRecord) -> Result<()> {
    insert_master_version(tx, &commit.snapshot)?;

    let now = Utc::now().to_rfc3339();
    for key in &commit.removed {
        tx.execute(
            "DELETE FROM alias_mapping WHERE record_key = ?1 AND master_id = ?2",
            params![key.to_string(), commit.master_id.as_str()],
        )?;
    }
    for key in &commit.added {
        tx.execute(
            "INSERT OR REPLACE INTO alias_mapping (record_key, kind, period, local_id, master_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.to_string(),
                key.kind.as_str(),
                key.period.to_string(),
                key.local_id,
                commit.master_id.as_str(),
                now,
            ],
        )?;
    }
    insert_event(tx, &AuditEvent::from_commit(commit))?;
    Ok(())
}

/// All master versions, oldest first
pub fn load_master_versions(conn: &Connection) -> Result<Vec<MasterEntity>> {
    let mut stmt = conn.prepare("SELECT payload FROM master_versions ORDER BY id ASC")?;
    let masters = stmt
        .query_map([], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str(&payload).map_err(|e| json_error(0, e))
        })?
        .collect::<rusqlite::Result<Vec<MasterEntity>>>()?;
    Ok(masters)
}

pub fn load_alias_mapping(conn: &Connection) -> Result<BTreeMap<RecordKey, MasterId>> {
    let mut stmt = conn.prepare("SELECT record_key, master_id FROM alias_mapping")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut mapping = BTreeMap::new();
    for (key, master) in rows {
        mapping.insert(key.parse::<RecordKey>()?, MasterId::from_raw(master));
    }
    Ok(mapping)
}

// ============================================================================
// CANDIDATES & REVIEW
// ============================================================================

/// A persisted candidate and, when queued, why and since when
#[derive(Debug, Clone)]
pub struct StoredCandidate {
    pub candidate: MatchCandidate,
    pub review: Option<(RecordError, DateTime<Utc>)>,
}

pub fn save_candidate(
    conn: &Connection,
    candidate: &MatchCandidate,
    review: Option<(&RecordError, DateTime<Utc>)>,
) -> Result<()> {
    let (reason, queued_at) = match review {
        Some((reason, at)) => (Some(serde_json::to_string(reason)?), Some(at.to_rfc3339())),
        None => (None, None),
    };
    conn.execute(
        "INSERT OR REPLACE INTO candidates (
            candidate_id, left_key, right_key, kind, score, disposition, decided_by,
            payload, review_reason, queued_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            candidate.id.as_str(),
            candidate.left.to_string(),
            candidate.right.to_string(),
            candidate.kind.as_str(),
            candidate.score,
            candidate.disposition.as_str(),
            candidate.decided_by,
            serde_json::to_string(candidate)?,
            reason,
            queued_at,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn load_candidates(conn: &Connection) -> Result<Vec<StoredCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT payload, review_reason, queued_at FROM candidates ORDER BY candidate_id ASC",
    )?;
    let stored = stmt
        .query_map([], |row| {
            let payload: String = row.get(0)?;
            let reason: Option<String> = row.get(1)?;
            let queued_at: Option<String> = row.get(2)?;

            let candidate: MatchCandidate = serde_json::from_str(&payload).map_err(|e| json_error(0, e))?;
            let review = match (reason, queued_at) {
                (Some(reason), Some(at)) => Some((
                    serde_json::from_str(&reason).map_err(|e| json_error(1, e))?,
                    parse_time(2, &at)?,
                )),
                _ => None,
            };
            Ok(StoredCandidate { candidate, review })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stored)
}

pub fn insert_review_decision(conn: &Connection, decision: &ReviewDecision, outcome: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO review_decisions (candidate_id, action, operator, payload, outcome, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            decision.candidate_id.as_ref().map(|c| c.as_str().to_string()),
            decision.action.as_str(),
            decision.operator,
            serde_json::to_string(decision)?,
            outcome,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Applied decisions with their outcome, oldest first
pub fn load_review_decisions(conn: &Connection) -> Result<Vec<(ReviewDecision, String)>> {
    let mut stmt = conn.prepare("SELECT payload, outcome FROM review_decisions ORDER BY id ASC")?;
    let decisions = stmt
        .query_map([], |row| {
            let payload: String = row.get(0)?;
            let decision: ReviewDecision = serde_json::from_str(&payload).map_err(|e| json_error(0, e))?;
            Ok((decision, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(decisions)
}

// ============================================================================
// QUARANTINE
// ============================================================================

/// Replace the quarantine rows of one stage (optionally one period)
pub fn replace_quarantine(
    conn: &Connection,
    stage: QuarantineStage,
    period: Option<PeriodId>,
    items: &[Quarantined],
) -> Result<usize> {
    match period {
        Some(p) => conn.execute(
            "DELETE FROM quarantine WHERE stage = ?1 AND period = ?2",
            params![stage.as_str(), p.to_string()],
        )?,
        None => conn.execute("DELETE FROM quarantine WHERE stage = ?1", params![stage.as_str()])?,
    };

    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT INTO quarantine (stage, period, source, reason_code, payload, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for item in items {
        stmt.execute(params![
            item.stage.as_str(),
            item.period.to_string(),
            item.source,
            item.reason_code(),
            serde_json::to_string(item)?,
            now,
        ])?;
    }
    Ok(items.len())
}

pub fn load_quarantine(conn: &Connection) -> Result<Vec<Quarantined>> {
    let mut stmt = conn.prepare("SELECT payload FROM quarantine ORDER BY id ASC")?;
    let items = stmt
        .query_map([], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str(&payload).map_err(|e| json_error(0, e))
        })?
        .collect::<rusqlite::Result<Vec<Quarantined>>>()?;
    Ok(items)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(AuditEvent {
                event_id: row.get(0)?,
                timestamp: parse_time(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| json_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SchemaShape;
    use crate::audit::ENTITY_MASTER;
    use crate::matcher::ScoreVector;
    use crate::records::{CandidateId, ListingStatus, PeriodRecord, RecordDetail};
    use crate::registry::{CommitRequest, MasterRegistry, MergeEvidence};
    use crate::review::ReviewAction;
    use rusqlite::OptionalExtension;

    fn q() -> PeriodId {
        PeriodId::quarter(2006, 1).unwrap()
    }

    fn count_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    fn latest_digest(conn: &Connection, period: PeriodId) -> Option<String> {
        conn.query_row(
            "SELECT digest FROM period_batches WHERE period = ?1 ORDER BY id DESC LIMIT 1",
            params![period.to_string()],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
    }

    fn create_test_commit(registry: &MasterRegistry, record: &PeriodRecord) -> CommitRecord {
        registry
            .commit(CommitRequest {
                master_id: MasterId::for_founder(&record.key),
                kind: record.kind(),
                create_seq: Some(registry.allocate_seq()),
                upsert: vec![record.clone()],
                remove: vec![],
                evidence: vec![MergeEvidence::automatic("unmatched record")],
            })
            .unwrap()
    }

    fn create_test_company(local_id: &str, name: &str) -> PeriodRecord {
        PeriodRecord {
            key: RecordKey::company(q(), local_id),
            raw_local_id: local_id.to_string(),
            name: name.to_string(),
            detail: RecordDetail::Company { ticker: Some("ACM".to_string()), status: ListingStatus::Unknown },
            source_tag: "test".to_string(),
        }
    }

    fn create_test_batch() -> PeriodBatch {
        PeriodBatch {
            period: q(),
            shape: SchemaShape::Form345Flat,
            adapter_version: "1.0.0".to_string(),
            layout_signature: "sig".to_string(),
            companies: vec![create_test_company("0000000001", "Acme Corp")],
            insiders: Vec::new(),
            transactions: Vec::new(),
            quarantined: Vec::new(),
            duplicate_transactions: 0,
        }
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
        assert_eq!(count_rows(&conn, "events"), 0);
    }

    #[test]
    fn test_batches_replay_in_order() {
        let conn = open_in_memory().unwrap();
        let first = create_test_batch();
        let mut second = create_test_batch();
        second.companies[0].name = "Acme Corporation".to_string();

        insert_batch(&conn, &first, &first.digest()).unwrap();
        insert_batch(&conn, &second, &second.digest()).unwrap();

        let loaded = load_batches(&conn).unwrap();
        assert_eq!(loaded, vec![first, second.clone()]);
        assert_eq!(latest_digest(&conn, q()), Some(second.digest()));
        println!("✅ Batch persistence PASSED");
    }

    #[test]
    fn test_commit_persists_atomically() {
        let mut conn = open_in_memory().unwrap();
        let registry = MasterRegistry::default();
        let record = create_test_company("0000000001", "Acme Corp");
        let id = MasterId::for_founder(&record.key);
        let commit = create_test_commit(&registry, &record);

        persist_commits(&mut conn, std::slice::from_ref(&commit)).unwrap();
        // Re-persisting the same version is harmless
        persist_commits(&mut conn, std::slice::from_ref(&commit)).unwrap();

        let versions = load_master_versions(&conn).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0], commit.snapshot);

        let mapping = load_alias_mapping(&conn).unwrap();
        assert_eq!(mapping.get(&record.key), Some(&id));

        let events = get_events_for_entity(&conn, "master", id.as_str()).unwrap();
        assert_eq!(events[0].event_type, "master_create");
        println!("✅ Commit persistence PASSED");
    }

    #[test]
    fn test_failed_commit_writes_nothing_of_its_operation() {
        let mut conn = open_in_memory().unwrap();
        let registry = MasterRegistry::default();
        let first = create_test_commit(&registry, &create_test_company("0000000001", "Acme Corp"));
        let second = create_test_commit(&registry, &create_test_company("0000000002", "Acme Corporation"));

        conn.execute(
            &format!(
                "CREATE TRIGGER reject_second BEFORE INSERT ON events WHEN NEW.entity_id = '{}'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END",
                second.master_id.as_str()
            ),
            [],
        )
        .unwrap();

        assert!(persist_commits(&mut conn, &[first.clone(), second.clone()]).is_err());
        assert_eq!(count_rows(&conn, "master_versions"), 0);
        assert_eq!(count_rows(&conn, "alias_mapping"), 0);
        assert_eq!(count_rows(&conn, "events"), 0);

        conn.execute("DROP TRIGGER reject_second", []).unwrap();
        persist_commits(&mut conn, &[first, second]).unwrap();
        assert_eq!(count_rows(&conn, "master_versions"), 2);
        assert_eq!(load_alias_mapping(&conn).unwrap().len(), 2);
        println!("✅ Atomic multi-commit persistence PASSED");
    }

    #[test]
    fn test_candidate_round_trip_with_review() {
        let conn = open_in_memory().unwrap();
        let candidate = MatchCandidate::new(
            &RecordKey::company(q(), "1"),
            &RecordKey::company(q(), "2"),
            ScoreVector { name: 1.0, identifier: 0.0, overlap: 0.5, temporal: 0.3 },
            0.58,
        );
        let reason = RecordError::AmbiguousMatch { candidate: candidate.id.clone(), score: 0.58 };
        let queued = Utc::now();

        save_candidate(&conn, &candidate, Some((&reason, queued))).unwrap();
        let stored = load_candidates(&conn).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].candidate, candidate);
        let (loaded_reason, _) = stored[0].review.clone().unwrap();
        assert_eq!(loaded_reason, reason);

        save_candidate(&conn, &candidate, None).unwrap();
        assert!(load_candidates(&conn).unwrap()[0].review.is_none());
    }

    #[test]
    fn test_quarantine_replaced_per_stage() {
        let conn = open_in_memory().unwrap();
        let item = Quarantined {
            stage: QuarantineStage::Linker,
            period: q(),
            source: "abc".to_string(),
            error: RecordError::UnresolvedReference {
                kind: crate::records::EntityKind::Insider,
                period: q(),
                local_id: "0000000009".to_string(),
            },
        };
        replace_quarantine(&conn, QuarantineStage::Linker, None, &[item.clone(), item.clone()]).unwrap();
        replace_quarantine(&conn, QuarantineStage::Linker, None, &[item.clone()]).unwrap();

        assert_eq!(load_quarantine(&conn).unwrap(), vec![item]);
    }

    #[test]
    fn test_review_decisions_kept_in_order() {
        let conn = open_in_memory().unwrap();
        let accept = ReviewDecision {
            candidate_id: Some(CandidateId::from_raw("abc")),
            action: ReviewAction::Accept,
            operator: "jdoe".to_string(),
            note: None,
        };
        let split = ReviewDecision {
            candidate_id: None,
            action: ReviewAction::Split { records: vec!["company:2008Q1:0000000007".to_string()] },
            operator: "jdoe".to_string(),
            note: Some("different issuer".to_string()),
        };
        insert_review_decision(&conn, &accept, "conflict").unwrap();
        insert_review_decision(&conn, &split, "applied").unwrap();

        let loaded = load_review_decisions(&conn).unwrap();
        assert_eq!(loaded, vec![(accept, "conflict".to_string()), (split, "applied".to_string())]);
    }

    #[test]
    fn test_event_log() {
        let conn = open_in_memory().unwrap();

        let entries = [("master_create", "MC-123"), ("master_extend", "MC-123"), ("master_create", "MI-9")];
        for (event_type, entity) in entries {
            insert_event(
                &conn,
                &AuditEvent::new(event_type, ENTITY_MASTER, entity, serde_json::json!({"version": 1}), "matcher"),
            )
            .unwrap();
        }

        let events = get_events_for_entity(&conn, ENTITY_MASTER, "MC-123").unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["master_create", "master_extend"]);
        assert_eq!(events[0].actor, "matcher");
        assert_eq!(events[1].data["version"], 1);

        println!("✅ Event log test PASSED");
    }
}
