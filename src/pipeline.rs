// 🚀 Consolidation Pipeline - ingest → match → resolve → link
//
// The Consolidator owns every component plus the SQLite connection. State is
// rebuilt from the database on open, so an interrupted run resumes from the
// last committed merge. Matching, commits and linking fan out on a dedicated
// rayon pool; planning and persistence stay on the calling thread.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::adapter::{AdapterRegistry, RawExtract};
use crate::audit::{AuditEvent, ENTITY_MASTER, ENTITY_PERIOD};
use crate::config::ConsolidatorConfig;
use crate::db;
use crate::error::{ConsolidationError, RecordError, Result};
use crate::linker::{LinkReport, TransactionLinker};
use crate::matcher::{CandidateBook, CandidateMatcher, Disposition, MatchCandidate, UpsertOutcome};
use crate::normalize::NameNormalizer;
use crate::period_store::{IngestOutcome, IngestStatus, PeriodStore};
use crate::records::{CandidateId, MasterId, QuarantineStage, Quarantined, RecordKey};
use crate::registry::{AliasQuery, CommitKind, CommitRecord, MasterEntity, MasterRegistry, Resolution};
use crate::resolution::ResolutionEngine;
use crate::review::{ReviewAction, ReviewDecision, ReviewItem, ReviewQueue};
use crate::temporal::PeriodId;
use crate::view::ConsolidatedView;

// ============================================================================
// REPORTS
// ============================================================================

/// A period whose extract could not be adapted
#[derive(Debug, Clone)]
pub struct PeriodFailure {
    pub period: PeriodId,
    pub signature: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub ingested: Vec<IngestOutcome>,
    pub failed: Vec<PeriodFailure>,
    pub rematched: usize,
    pub candidates: BTreeMap<Disposition, usize>,
    pub masters_created: usize,
    pub masters_extended: usize,
    pub conflicts: usize,
    pub review_open: usize,
    pub review_stale: usize,
    pub linked: usize,
    pub quarantined: BTreeMap<String, usize>,
    /// Transaction rows collapsed as repeats within one filing
    pub duplicates: usize,
    pub elapsed_ms: u128,
}

impl RunSummary {
    pub fn quarantined_total(&self) -> usize {
        self.quarantined.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |status: IngestStatus| self.ingested.iter().filter(|o| o.status == status).count();
        writeln!(f, "📊 Run summary")?;
        writeln!(
            f,
            "   Periods ingested: {} ({} new, {} revised, {} unchanged)",
            self.ingested.len(),
            count(IngestStatus::New),
            count(IngestStatus::Revised),
            count(IngestStatus::Unchanged)
        )?;
        writeln!(f, "   Periods failed:   {}", self.failed.len())?;
        for failure in &self.failed {
            match &failure.signature {
                Some(sig) => writeln!(f, "      {} {} (layout {})", failure.period, failure.reason, sig)?,
                None => writeln!(f, "      {} {}", failure.period, failure.reason)?,
            }
        }
        let added: usize = self.ingested.iter().map(|o| o.added.len()).sum();
        let revised: usize = self.ingested.iter().map(|o| o.revised.len()).sum();
        writeln!(f, "   Records:          {} added, {} revised, {} re-matched", added, revised, self.rematched)?;
        let candidates: Vec<String> = self.candidates.iter().map(|(d, n)| format!("{} {}", d, n)).collect();
        writeln!(
            f,
            "   Candidates:       {}",
            if candidates.is_empty() { "none".to_string() } else { candidates.join(", ") }
        )?;
        writeln!(f, "   Masters:          {} created, {} extended", self.masters_created, self.masters_extended)?;
        writeln!(f, "   Conflicts:        {}", self.conflicts)?;
        writeln!(f, "   Review queue:     {} open ({} stale)", self.review_open, self.review_stale)?;
        writeln!(
            f,
            "   Transactions:     {} linked, {} quarantined, {} duplicates collapsed",
            self.linked,
            self.quarantined_total(),
            self.duplicates
        )?;
        if !self.quarantined.is_empty() {
            let reasons: Vec<String> = self.quarantined.iter().map(|(r, n)| format!("{} {}", r, n)).collect();
            writeln!(f, "   Quarantine:       {}", reasons.join(", "))?;
        }
        write!(f, "   Elapsed:          {} ms", self.elapsed_ms)
    }
}

/// Result of applying one review decision
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub action: String,
    pub commits: Vec<CommitRecord>,
    pub candidates_updated: Vec<CandidateId>,
}

/// Every version of a master plus its audit events
#[derive(Debug, Clone)]
pub struct MasterHistory {
    pub current: MasterEntity,
    pub versions: Vec<MasterEntity>,
    pub events: Vec<AuditEvent>,
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

pub struct Consolidator {
    config: ConsolidatorConfig,
    adapters: AdapterRegistry,
    store: PeriodStore,
    matcher: CandidateMatcher,
    book: CandidateBook,
    registry: MasterRegistry,
    engine: ResolutionEngine,
    linker: TransactionLinker,
    review: ReviewQueue,
    links: LinkReport,
    conn: Connection,
    pool: rayon::ThreadPool,
    pending_ingests: Vec<IngestOutcome>,
    pending_failures: Vec<PeriodFailure>,
}

impl Consolidator {
    /// Open (or create) the database named in the config and restore state
    pub fn open(config: ConsolidatorConfig) -> Result<Self> {
        let conn = db::open(&config.storage.db_path)?;
        Self::with_connection(config, conn)
    }

    pub fn in_memory(config: ConsolidatorConfig) -> Result<Self> {
        Self::with_connection(config, db::open_in_memory()?)
    }

    pub fn with_connection(config: ConsolidatorConfig, conn: Connection) -> Result<Self> {
        config.validate()?;
        db::setup_database(&conn)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pipeline.worker_threads)
            .thread_name(|i| format!("consolidator-{}", i))
            .build()
            .map_err(|e| ConsolidationError::Config(format!("worker pool: {}", e)))?;

        let normalizer = NameNormalizer::new(&config.normalization);
        let mut consolidator = Consolidator {
            matcher: CandidateMatcher::new(config.matching.clone(), normalizer.clone()),
            registry: MasterRegistry::new(normalizer),
            adapters: AdapterRegistry::with_defaults(),
            store: PeriodStore::new(),
            book: CandidateBook::new(),
            engine: ResolutionEngine::new(),
            linker: TransactionLinker::new(),
            review: ReviewQueue::new(),
            links: LinkReport::default(),
            conn,
            pool,
            pending_ingests: Vec::new(),
            pending_failures: Vec::new(),
            config,
        };
        consolidator.restore()?;
        Ok(consolidator)
    }

    /// Rebuild in-memory state from the database
    fn restore(&mut self) -> Result<()> {
        for batch in db::load_batches(&self.conn)? {
            self.store.ingest(batch);
        }
        self.store.take_dirty();

        self.registry
            .restore(db::load_master_versions(&self.conn)?, db::load_alias_mapping(&self.conn)?);

        for stored in db::load_candidates(&self.conn)? {
            if let Some((reason, queued_at)) = stored.review {
                self.review.enqueue(stored.candidate.clone(), reason, queued_at);
            }
            self.book.restore(stored.candidate);
        }

        self.engine.rebuild(&self.store, &self.registry);

        // Records ingested but never committed (interrupted run)
        let unresolved: Vec<_> = self
            .store
            .records()
            .filter(|(_, r)| self.registry.master_for(&r.key).is_none())
            .map(|(id, _)| id)
            .collect();
        if !unresolved.is_empty() {
            warn!(records = unresolved.len(), "records without a master, queued for the next run");
        }
        self.store.mark_dirty(unresolved);

        if !self.store.is_empty() {
            self.relink()?;
            info!(
                records = self.store.len(),
                masters = self.registry.master_count(),
                candidates = self.book.len(),
                "state restored"
            );
        }
        Ok(())
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Adapt one extract and add it to the Period Store
    ///
    /// Schema drift fails this period only; it is recorded for the next run
    /// summary and returned to the caller.
    pub fn ingest(&mut self, extract: &RawExtract) -> Result<IngestOutcome> {
        let batch = match self.adapters.adapt(extract) {
            Ok(batch) => batch,
            Err(err) => {
                let signature = match &err {
                    ConsolidationError::SchemaDrift { signature, .. } => Some(signature.clone()),
                    _ => None,
                };
                db::insert_event(
                    &self.conn,
                    &AuditEvent::new(
                        "period_rejected",
                        ENTITY_PERIOD,
                        &extract.period.to_string(),
                        serde_json::json!({ "error": err.to_string(), "signature": signature }),
                        "adapter",
                    ),
                )?;
                self.pending_failures.push(PeriodFailure {
                    period: extract.period,
                    signature,
                    reason: if err.is_schema_drift() { "schema drift".to_string() } else { err.to_string() },
                });
                return Err(err);
            }
        };

        let period = batch.period;
        let outcome = self.store.ingest(batch);
        if outcome.status != IngestStatus::Unchanged {
            if let Some(batch) = self.store.latest_batch(period) {
                let tx = self.conn.transaction()?;
                db::insert_batch(&tx, batch, &outcome.digest)?;
                db::replace_quarantine(&tx, QuarantineStage::Adapter, Some(period), &batch.quarantined)?;
                db::insert_event(&tx, &AuditEvent::from_ingest(&outcome, "adapter"))?;
                for item in &batch.quarantined {
                    db::insert_event(&tx, &AuditEvent::from_quarantine(item))?;
                }
                tx.commit()?;
            }
        }
        self.pending_ingests.push(outcome.clone());
        Ok(outcome)
    }

    /// Load a directory of table files for `period` and ingest it
    pub fn ingest_dir(&mut self, dir: &Path, period: PeriodId, declared_shape: Option<&str>) -> Result<IngestOutcome> {
        let extract = RawExtract::load_dir(dir, period, declared_shape.map(String::from))?;
        self.ingest(&extract)
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Match new/revised records, resolve, and relink transactions
    pub fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let now = Utc::now();
        let dirty = self.store.take_dirty();

        let proposals = {
            let (matcher, store) = (&self.matcher, &self.store);
            self.pool.install(|| matcher.propose(store, &dirty))
        };

        let mut changed: BTreeSet<CandidateId> = BTreeSet::new();
        for proposal in &proposals {
            match self.book.upsert(proposal.clone()) {
                UpsertOutcome::New | UpsertOutcome::Updated => {
                    changed.insert(proposal.id.clone());
                }
                UpsertOutcome::Unchanged | UpsertOutcome::OperatorKept => {}
            }
        }

        let accepted: Vec<MatchCandidate> = proposals
            .iter()
            .filter_map(|p| self.book.get(&p.id))
            .filter(|c| c.disposition == Disposition::Accepted)
            .cloned()
            .collect();

        let outcome = {
            let (engine, store, registry) = (&mut self.engine, &self.store, &self.registry);
            self.pool.install(|| engine.resolve(store, registry, &accepted, &dirty))?
        };
        db::persist_commits(&mut self.conn, &outcome.commits)?;

        for conflict in &outcome.conflicts {
            self.route_conflict(&conflict.candidate.id, conflict.error.clone(), None, now)?;
            changed.insert(conflict.candidate.id.clone());
        }

        // Queue bookkeeping for this run's proposals
        for proposal in &proposals {
            let Some(candidate) = self.book.get(&proposal.id).cloned() else { continue };
            if candidate.disposition == Disposition::NeedsReview {
                if self.review.get(&candidate.id).is_none() {
                    let reason = RecordError::AmbiguousMatch { candidate: candidate.id.clone(), score: candidate.score };
                    self.review.enqueue(candidate, reason, now);
                    changed.insert(proposal.id.clone());
                }
            } else if self.review.remove(&candidate.id).is_some() {
                changed.insert(proposal.id.clone());
            }
        }

        for id in &changed {
            self.persist_candidate(id)?;
            if let Some(candidate) = self.book.get(id) {
                db::insert_event(
                    &self.conn,
                    &AuditEvent::from_candidate(&format!("candidate_{}", candidate.disposition), candidate),
                )?;
            }
        }

        self.relink()?;

        let mut candidates = BTreeMap::new();
        for proposal in &proposals {
            if let Some(c) = self.book.get(&proposal.id) {
                *candidates.entry(c.disposition).or_insert(0) += 1;
            }
        }

        let ingested = std::mem::take(&mut self.pending_ingests);
        let duplicates = ingested
            .iter()
            .filter(|o| o.status != IngestStatus::Unchanged)
            .map(|o| o.duplicates)
            .sum();
        let summary = RunSummary {
            ingested,
            failed: std::mem::take(&mut self.pending_failures),
            rematched: dirty.len(),
            candidates,
            masters_created: outcome.commits.iter().filter(|c| c.kind == CommitKind::Create).count(),
            masters_extended: outcome.commits.iter().filter(|c| c.kind != CommitKind::Create).count(),
            conflicts: outcome.conflicts.len(),
            review_open: self.review.len(),
            review_stale: self.stale_reviews(now).len(),
            linked: self.links.linked.len(),
            quarantined: self.quarantine_counts(),
            duplicates,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            rematched = summary.rematched,
            commits = outcome.commits.len(),
            conflicts = summary.conflicts,
            linked = summary.linked,
            "✅ run complete"
        );
        Ok(summary)
    }

    /// Re-match every record; safe to repeat, converges to the same masters
    pub fn run_full(&mut self) -> Result<RunSummary> {
        self.store.mark_all_dirty();
        self.run()
    }

    fn relink(&mut self) -> Result<()> {
        let (linker, registry, store) = (&self.linker, &self.registry, &self.store);
        self.links = self.pool.install(|| linker.link(registry, store.transactions()));
        db::replace_quarantine(&self.conn, QuarantineStage::Linker, None, &self.links.quarantined)?;
        Ok(())
    }

    fn quarantine_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in self.store.quarantined().chain(self.links.quarantined.iter()) {
            *counts.entry(item.reason_code().to_string()).or_insert(0) += 1;
        }
        counts
    }

    fn persist_candidate(&self, id: &CandidateId) -> Result<()> {
        let Some(candidate) = self.book.get(id) else { return Ok(()) };
        let review = self.review.get(id).map(|item| (&item.reason, item.queued_at));
        db::save_candidate(&self.conn, candidate, review)
    }

    fn route_conflict(
        &mut self,
        id: &CandidateId,
        error: RecordError,
        operator: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let reason = match &error {
            RecordError::Conflict { left, right, .. } => format!("conflict: {} vs {}", left, right),
            other => other.to_string(),
        };
        let candidate = self.book.decide(id, Disposition::NeedsReview, reason, operator)?.clone();
        self.review.enqueue(candidate, error, now);
        Ok(())
    }

    // ========================================================================
    // MANUAL REVIEW
    // ========================================================================

    pub fn apply_review(&mut self, decision: &ReviewDecision) -> Result<ReviewOutcome> {
        decision.validate()?;
        let now = Utc::now();
        let operator = decision.operator.trim().to_string();
        let note = decision.note_or_default();

        let result = match &decision.action {
            ReviewAction::Accept => self.review_accept(decision, &operator, &note, now),
            ReviewAction::Reject => self.review_reject(decision, &operator, &note),
            ReviewAction::OverrideConflict => self.review_override(decision, &operator, &note),
            ReviewAction::Split { .. } => self.review_split(decision, &operator, &note),
        };

        let outcome_label = match &result {
            Ok(_) => "applied".to_string(),
            Err(e) if e.is_conflict() => "conflict".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        db::insert_review_decision(&self.conn, decision, &outcome_label)?;

        let outcome = result?;
        db::persist_commits(&mut self.conn, &outcome.commits)?;
        for id in &outcome.candidates_updated {
            self.persist_candidate(id)?;
            if let Some(candidate) = self.book.get(id) {
                db::insert_event(
                    &self.conn,
                    &AuditEvent::from_candidate(&format!("review_{}", decision.action.as_str()), candidate),
                )?;
            }
        }
        self.relink()?;
        info!(
            action = decision.action.as_str(),
            operator = %operator,
            commits = outcome.commits.len(),
            "review decision applied"
        );
        Ok(outcome)
    }

    fn candidate_for(&self, decision: &ReviewDecision) -> Result<MatchCandidate> {
        let id = decision
            .candidate_id
            .as_ref()
            .ok_or_else(|| ConsolidationError::InvalidDecision("candidate_id missing".to_string()))?;
        self.book
            .get(id)
            .cloned()
            .ok_or_else(|| ConsolidationError::UnknownCandidate(id.to_string()))
    }

    fn review_accept(
        &mut self,
        decision: &ReviewDecision,
        operator: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome> {
        let candidate = self.candidate_for(decision)?;
        let accepted = self
            .book
            .decide(&candidate.id, Disposition::Accepted, note, Some(operator.to_string()))?
            .clone();

        let resolved = {
            let (engine, store, registry) = (&mut self.engine, &self.store, &self.registry);
            self.pool.install(|| engine.resolve(store, registry, &[accepted], &[]))?
        };

        if let Some(conflict) = resolved.conflicts.into_iter().next() {
            // Both sides already carry masters: only an explicit override may merge them
            self.route_conflict(&candidate.id, conflict.error.clone(), Some(operator.to_string()), now)?;
            self.persist_candidate(&candidate.id)?;
            return Err(ConsolidationError::Record(conflict.error));
        }

        self.review.remove(&candidate.id);
        Ok(ReviewOutcome {
            action: "accept".to_string(),
            commits: resolved.commits,
            candidates_updated: vec![candidate.id],
        })
    }

    fn review_reject(&mut self, decision: &ReviewDecision, operator: &str, note: &str) -> Result<ReviewOutcome> {
        let candidate = self.candidate_for(decision)?;
        if self.engine.same_class(&self.store, &candidate.left, &candidate.right) {
            warn!(
                candidate = %candidate.id.short(),
                "rejected pair already shares a master; use split to separate it"
            );
        }
        self.book
            .decide(&candidate.id, Disposition::Rejected, note, Some(operator.to_string()))?;
        self.review.remove(&candidate.id);
        Ok(ReviewOutcome {
            action: "reject".to_string(),
            commits: Vec::new(),
            candidates_updated: vec![candidate.id],
        })
    }

    fn review_override(&mut self, decision: &ReviewDecision, operator: &str, note: &str) -> Result<ReviewOutcome> {
        let candidate = self.candidate_for(decision)?;
        let commits = {
            let (engine, store, registry) = (&mut self.engine, &self.store, &self.registry);
            engine.override_conflict(store, registry, &candidate, operator, note)?
        };
        self.book
            .decide(&candidate.id, Disposition::Accepted, note, Some(operator.to_string()))?;
        self.review.remove(&candidate.id);
        Ok(ReviewOutcome {
            action: "override_conflict".to_string(),
            commits,
            candidates_updated: vec![candidate.id],
        })
    }

    fn review_split(&mut self, decision: &ReviewDecision, operator: &str, note: &str) -> Result<ReviewOutcome> {
        let keys: BTreeSet<RecordKey> = decision.split_keys()?.into_iter().collect();
        let commits = {
            let (engine, store, registry) = (&mut self.engine, &self.store, &self.registry);
            engine.split(store, registry, &keys, operator, note)?
        };

        // Evidence that tied the separated records to the rest is overruled
        let bridging: Vec<CandidateId> = self
            .book
            .iter()
            .filter(|c| c.disposition == Disposition::Accepted)
            .filter(|c| keys.contains(&c.left) != keys.contains(&c.right))
            .map(|c| c.id.clone())
            .collect();
        for id in &bridging {
            self.book
                .decide(id, Disposition::Rejected, format!("separated by split: {}", note), Some(operator.to_string()))?;
            self.review.remove(id);
        }

        Ok(ReviewOutcome {
            action: "split".to_string(),
            commits,
            candidates_updated: bridging,
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// resolve(alias, as_of) → master identifier + current canonical values
    pub fn resolve(&self, query: &AliasQuery, as_of: NaiveDate) -> Result<Option<Resolution>> {
        self.registry.resolve(query, as_of)
    }

    pub fn view(&self) -> ConsolidatedView {
        ConsolidatedView::build(&self.registry, &self.links.linked)
    }

    pub fn history(&self, id: &MasterId) -> Result<MasterHistory> {
        let current = self
            .registry
            .get(id)
            .ok_or_else(|| ConsolidationError::UnknownMaster(id.to_string()))?;
        Ok(MasterHistory {
            current,
            versions: self.registry.all_versions(id),
            events: db::get_events_for_entity(&self.conn, ENTITY_MASTER, id.as_str())?,
        })
    }

    pub fn review_items(&self) -> Vec<&ReviewItem> {
        self.review.items()
    }

    pub fn stale_reviews(&self, now: DateTime<Utc>) -> Vec<&ReviewItem> {
        self.review.stale(now, self.config.review.stale_after_days)
    }

    /// Every decision received, oldest first, with the label it was logged under
    pub fn review_decisions(&self) -> Result<Vec<(ReviewDecision, String)>> {
        db::load_review_decisions(&self.conn)
    }

    /// Persisted quarantine of both the adapter and linker stages
    pub fn quarantine(&self) -> Result<Vec<Quarantined>> {
        db::load_quarantine(&self.conn)
    }

    pub fn registry(&self) -> &MasterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PeriodStore {
        &self.store
    }

    pub fn candidates(&self) -> &CandidateBook {
        &self.book
    }

    pub fn links(&self) -> &LinkReport {
        &self.links
    }

    pub fn config(&self) -> &ConsolidatorConfig {
        &self.config
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::{create_flat_extract, create_relational_extract, q};
    use crate::records::EntityKind;

    fn create_consolidator() -> Consolidator {
        Consolidator::in_memory(ConsolidatorConfig::default()).unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    fn flat_row<'a>(
        issuer: &'a str,
        issuer_name: &'a str,
        ticker: &'a str,
        owner: &'a str,
        owner_name: &'a str,
        director: &'a str,
        officer: &'a str,
        date: &'a str,
    ) -> [&'a str; 14] {
        [
            issuer, issuer_name, ticker, owner, owner_name, director, officer, "0", "", date, "P", "100", "10.00", "A",
        ]
    }

    fn acme_2006() -> RawExtract {
        create_flat_extract(
            q(2006, 1),
            &[flat_row("0000123", "Acme Corp", "ACM", "456", "SMITH JOHN", "1", "0", "2006-01-15")],
        )
    }

    fn acme_2025() -> RawExtract {
        create_relational_extract(
            q(2025, 2),
            &[&["0001-25-1", "0000999", "Acme Corporation", "ACM", "0"]],
            &[&["0001-25-1", "456", "SMITH JOHN", "Director", ""]],
            &[&["0001-25-1", "15-MAY-2025", "S", "50", "12.50", "D"]],
        )
    }

    fn company_key(period: PeriodId, local_id: &str) -> RecordKey {
        RecordKey::new(EntityKind::Company, period, local_id)
    }

    #[test]
    fn test_acme_resolves_to_one_master() {
        let mut c = create_consolidator();
        c.ingest(&acme_2006()).unwrap();
        c.ingest(&acme_2025()).unwrap();
        let summary = c.run().unwrap();

        let old = c.registry().master_for(&company_key(q(2006, 1), "0000000123")).unwrap();
        let new = c.registry().master_for(&company_key(q(2025, 2), "0000000999")).unwrap();
        assert_eq!(old, new);

        let view = c.view();
        let history = view.for_company(&old);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].company_name, "Acme Corporation");
        assert_eq!(history[0].master_insider_id, history[1].master_insider_id);
        assert!(c.links().is_complete(c.store().transactions().count()));
        assert_eq!(summary.conflicts, 0);
        println!("{}", summary);
        println!("✅ Acme cross-period resolution PASSED");
    }

    #[test]
    fn test_namesake_insiders_stay_apart() {
        let mut c = create_consolidator();
        c.ingest(&create_flat_extract(
            q(2006, 1),
            &[flat_row("1", "Acme Corp", "ACM", "100", "SMITH JOHN", "1", "0", "2006-01-15")],
        ))
        .unwrap();
        c.ingest(&create_flat_extract(
            q(2008, 3),
            &[flat_row("2", "Globex Inc", "GBX", "200", "SMITH JOHN", "0", "1", "2008-08-01")],
        ))
        .unwrap();
        c.run().unwrap();

        let a = c.registry().master_for(&RecordKey::insider(q(2006, 1), "0000000100")).unwrap();
        let b = c.registry().master_for(&RecordKey::insider(q(2008, 3), "0000000200")).unwrap();
        assert_ne!(a, b);
        assert_eq!(c.review_items().len(), 1);
        assert_eq!(c.review_items()[0].candidate.disposition, Disposition::NeedsReview);
    }

    #[test]
    fn test_full_rerun_is_idempotent() {
        let mut c = create_consolidator();
        c.ingest(&acme_2006()).unwrap();
        c.ingest(&acme_2025()).unwrap();
        c.run().unwrap();
        let mapping = c.registry().alias_mapping();
        let versions: Vec<usize> = c
            .registry()
            .active_masters()
            .iter()
            .map(|m| c.registry().all_versions(&m.id).len())
            .collect();

        let summary = c.run_full().unwrap();

        assert_eq!(summary.masters_created + summary.masters_extended, 0);
        assert_eq!(c.registry().alias_mapping(), mapping);
        let again: Vec<usize> = c
            .registry()
            .active_masters()
            .iter()
            .map(|m| c.registry().all_versions(&m.id).len())
            .collect();
        assert_eq!(versions, again);
    }

    #[test]
    fn test_identifiers_survive_new_periods() {
        let mut c = create_consolidator();
        c.ingest(&acme_2006()).unwrap();
        c.run().unwrap();
        let before = c.registry().alias_mapping();

        c.ingest(&acme_2025()).unwrap();
        c.run().unwrap();
        let after = c.registry().alias_mapping();

        for (key, master) in &before {
            assert_eq!(after.get(key), Some(master), "{} changed master", key);
        }
        assert!(after.len() > before.len());
    }

    #[test]
    fn test_schema_drift_is_isolated() {
        let mut c = create_consolidator();
        c.ingest(&acme_2006()).unwrap();
        let drifted = create_flat_extract(
            q(2020, 1),
            &[flat_row("9", "Initech", "INT", "9", "LUMBERGH BILL", "0", "1", "2020-01-01")],
        );
        assert!(c.ingest(&drifted).unwrap_err().is_schema_drift());

        let summary = c.run().unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].period, q(2020, 1));
        assert_eq!(summary.ingested.len(), 1);
        assert!(c.registry().master_for(&company_key(q(2006, 1), "0000000123")).is_some());
        assert!(c.store().periods().iter().all(|p| *p != q(2020, 1)));
    }

    #[test]
    fn test_review_accept_conflict_override_split() {
        let mut c = create_consolidator();
        c.ingest(&create_flat_extract(
            q(2006, 1),
            &[flat_row("1", "Acme Corp", "ACM", "100", "DOE JANE", "1", "0", "2006-01-15")],
        ))
        .unwrap();
        c.ingest(&create_flat_extract(
            q(2009, 2),
            &[flat_row("2", "Acme Corp", "ACX", "300", "ROE RICHARD", "1", "0", "2009-05-15")],
        ))
        .unwrap();
        c.run().unwrap();

        let left = company_key(q(2006, 1), "0000000001");
        let right = company_key(q(2009, 2), "0000000002");
        let item = c
            .review_items()
            .into_iter()
            .find(|i| i.candidate.left == left && i.candidate.right == right)
            .cloned()
            .unwrap();
        let (ma, mb) = (c.registry().master_for(&left).unwrap(), c.registry().master_for(&right).unwrap());
        assert_ne!(ma, mb);

        // Accepting a pair whose records already carry masters is a conflict
        let accept = ReviewDecision {
            candidate_id: Some(item.candidate.id.clone()),
            action: ReviewAction::Accept,
            operator: "analyst".to_string(),
            note: None,
        };
        let err = c.apply_review(&accept).unwrap_err();
        assert!(err.is_conflict());
        assert_ne!(c.registry().master_for(&left), c.registry().master_for(&right));
        assert!(matches!(
            c.review_items().iter().find(|i| i.candidate.id == item.candidate.id).unwrap().reason,
            RecordError::Conflict { .. }
        ));

        let override_decision = ReviewDecision { action: ReviewAction::OverrideConflict, ..accept.clone() };
        let outcome = c.apply_review(&override_decision).unwrap();
        assert_eq!(outcome.commits.len(), 2);
        assert_eq!(c.registry().master_for(&right), Some(ma.clone()));
        assert_eq!(c.registry().surviving(&mb), Some(ma.clone()));

        // Operator decision survives a full re-run
        c.run_full().unwrap();
        assert_eq!(c.candidates().get(&item.candidate.id).unwrap().decided_by.as_deref(), Some("analyst"));
        assert_eq!(c.registry().master_for(&right), Some(ma.clone()));

        let split = ReviewDecision {
            candidate_id: None,
            action: ReviewAction::Split { records: vec![right.to_string()] },
            operator: "analyst".to_string(),
            note: Some("different issuer".to_string()),
        };
        let outcome = c.apply_review(&split).unwrap();
        assert_eq!(outcome.commits.len(), 2);
        assert_eq!(c.registry().master_for(&left), Some(ma.clone()));
        assert_ne!(c.registry().master_for(&right), Some(ma));
        assert_eq!(
            c.candidates().get(&item.candidate.id).unwrap().disposition,
            Disposition::Rejected
        );

        let history = c.history(&mb).unwrap();
        assert!(history.versions.len() >= 2);
        assert!(history.events.iter().any(|e| e.event_type == "master_absorbed"));

        let labels: Vec<String> = c.review_decisions().unwrap().into_iter().map(|(_, label)| label).collect();
        assert_eq!(labels, vec!["conflict", "applied", "applied"]);
        println!("✅ Review workflow PASSED");
    }

    #[test]
    fn test_same_trade_in_two_filings_links_twice() {
        let mut c = create_consolidator();
        c.ingest(&create_relational_extract(
            q(2025, 2),
            &[&["0001-25-1", "999", "Acme Corporation", "ACM", ""], &["0001-25-2", "999", "Acme Corporation", "ACM", ""]],
            &[&["0001-25-1", "777", "DOE JANE", "Officer", ""], &["0001-25-2", "777", "DOE JANE", "Officer", ""]],
            &[
                &["0001-25-1", "15-APR-2025", "S", "1,000", "25.5", "D"],
                &["0001-25-1", "15-APR-2025", "S", "1,000", "25.5", "D"],
                &["0001-25-2", "15-APR-2025", "S", "1,000", "25.5", "D"],
            ],
        ))
        .unwrap();
        let summary = c.run().unwrap();

        assert_eq!(c.links().linked.len(), 2);
        assert_eq!(summary.linked, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.quarantined_total(), 0);
        let volume: f64 = c.view().rows().iter().map(|r| r.shares).sum();
        assert_eq!(volume, 2000.0);
        println!("✅ Same trade in two filings PASSED");
    }

    #[test]
    fn test_quarantine_is_persisted() {
        let mut c = create_consolidator();
        c.ingest(&create_flat_extract(
            q(2006, 1),
            &[
                flat_row("1", "Acme Corp", "ACM", "100", "DOE JANE", "1", "0", "2006-01-15"),
                flat_row("1", "Acme Corp", "ACM", "100", "DOE JANE", "1", "0", "someday"),
            ],
        ))
        .unwrap();
        let summary = c.run().unwrap();

        let stored = c.quarantine().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stage, QuarantineStage::Adapter);
        assert_eq!(stored[0].source, "FORM345 line 3");
        assert_eq!(summary.quarantined.get("DATA_QUALITY"), Some(&1));
    }

    #[test]
    fn test_resume_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConsolidatorConfig::default();
        config.storage.db_path = dir.path().join("consolidator.db");

        let mapping = {
            let mut c = Consolidator::open(config.clone()).unwrap();
            c.ingest(&acme_2006()).unwrap();
            c.ingest(&acme_2025()).unwrap();
            c.run().unwrap();
            c.registry().alias_mapping()
        };

        let mut c = Consolidator::open(config).unwrap();
        assert_eq!(c.registry().alias_mapping(), mapping);
        assert_eq!(c.links().linked.len(), 2);

        let outcome = c.ingest(&acme_2006()).unwrap();
        assert_eq!(outcome.status, IngestStatus::Unchanged);
        let summary = c.run().unwrap();
        assert_eq!(summary.masters_created + summary.masters_extended, 0);
        assert_eq!(c.registry().alias_mapping(), mapping);
    }

    #[test]
    fn test_resolve_by_ticker_as_of() {
        let mut c = create_consolidator();
        c.ingest(&acme_2006()).unwrap();
        c.ingest(&acme_2025()).unwrap();
        c.run().unwrap();

        let hit = c
            .resolve(
                &AliasQuery::Ticker { ticker: "ACM".to_string() },
                NaiveDate::from_ymd_opt(2006, 2, 1).unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(hit.canonical_name, "Acme Corporation");
        assert_eq!(hit.kind, EntityKind::Company);
    }
}
