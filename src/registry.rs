// 🏛️ Master Registry - stable identity + alias history
//
// "A master identifier is IDENTITY (never changes), names/tickers/local ids
// are VALUES (change over time)."
//
// - Every change appends a new MasterEntity version; nothing is overwritten
// - A master is never deleted: it is merged into another or split from
// - Aliases carry validity intervals so lookups have as-of semantics
// - Commits to one master serialize on that master's cluster lock; commits to
//   unrelated masters proceed in parallel

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ConsolidationError, Result};
use crate::normalize::{clean_ticker, normalize_local_id, NameNormalizer};
use crate::records::{CandidateId, EntityKind, MasterId, PeriodRecord, RecordKey};
use crate::temporal::{PeriodId, ValidityInterval};

// ============================================================================
// ALIAS
// ============================================================================

/// One (name, ticker, local id) combination a master was known by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub ticker: Option<String>,
    pub local_id: String,
    pub first_period: PeriodId,
    pub last_period: PeriodId,

    /// Period records that reported this alias
    pub sources: BTreeSet<RecordKey>,
}

impl Alias {
    fn from_record(record: &PeriodRecord) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(record.key.clone());
        Alias {
            name: record.name.trim().to_string(),
            ticker: record.ticker().map(String::from),
            local_id: record.key.local_id.clone(),
            first_period: record.period(),
            last_period: record.period(),
            sources,
        }
    }

    fn same_values(&self, other: &Alias) -> bool {
        self.name == other.name && self.ticker == other.ticker && self.local_id == other.local_id
    }

    /// Recompute the period span from the sources; false when none are left
    fn recompute_span(&mut self) -> bool {
        let periods: Vec<PeriodId> = self.sources.iter().map(|k| k.period).collect();
        match (periods.iter().min(), periods.iter().max()) {
            (Some(first), Some(last)) => {
                self.first_period = *first;
                self.last_period = *last;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// MASTER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "into", rename_all = "snake_case")]
pub enum MasterStatus {
    Active,
    MergedInto(MasterId),
}

/// Evidence behind one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEvidence {
    pub candidate: Option<CandidateId>,
    pub score: Option<f64>,
    pub reason: String,

    /// "matcher" for automatic decisions, operator name otherwise
    pub actor: String,
}

impl MergeEvidence {
    pub fn automatic(reason: impl Into<String>) -> Self {
        MergeEvidence {
            candidate: None,
            score: None,
            reason: reason.into(),
            actor: "matcher".to_string(),
        }
    }

    pub fn from_candidate(candidate: &CandidateId, score: f64, reason: &str, actor: &str) -> Self {
        MergeEvidence {
            candidate: Some(candidate.clone()),
            score: Some(score),
            reason: reason.to_string(),
            actor: actor.to_string(),
        }
    }
}

/// Provenance entry: which evidence produced which version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProvenance {
    pub version: u64,
    pub kind: CommitKind,
    pub evidence: Vec<MergeEvidence>,
    pub added: Vec<RecordKey>,
    pub removed: Vec<RecordKey>,
}

/// MasterEntity - one version of a master company or insider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterEntity {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    pub id: MasterId,
    pub kind: EntityKind,

    /// Creation order; decides which master survives an override merge
    pub created_seq: u64,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub canonical_name: String,
    pub canonical_ticker: Option<String>,

    /// Ordered by first period, then last period, then name
    pub aliases: Vec<Alias>,
    pub members: BTreeSet<RecordKey>,
    pub provenance: Vec<MergeProvenance>,
    pub status: MasterStatus,

    // ========================================================================
    // VERSIONING
    // ========================================================================
    pub version: u64,
    pub system_time: DateTime<Utc>,
}

impl MasterEntity {
    pub fn new(id: MasterId, kind: EntityKind, created_seq: u64) -> Self {
        MasterEntity {
            id,
            kind,
            created_seq,
            canonical_name: String::new(),
            canonical_ticker: None,
            aliases: Vec::new(),
            members: BTreeSet::new(),
            provenance: Vec::new(),
            status: MasterStatus::Active,
            version: 0,
            system_time: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MasterStatus::Active
    }

    /// Add (or refresh) a member record and its alias
    pub fn absorb(&mut self, record: &PeriodRecord) {
        if self.members.contains(&record.key) {
            self.detach(&record.key);
        }
        self.members.insert(record.key.clone());
        self.absorb_alias(Alias::from_record(record));
    }

    fn absorb_alias(&mut self, alias: Alias) {
        match self.aliases.iter_mut().find(|a| a.same_values(&alias)) {
            Some(existing) => {
                existing.sources.extend(alias.sources);
                existing.recompute_span();
            }
            None => self.aliases.push(alias),
        }
        self.sort_aliases();
    }

    /// True when the record is a member and its alias is already on file
    pub fn reflects(&self, record: &PeriodRecord) -> bool {
        let alias = Alias::from_record(record);
        self.members.contains(&record.key)
            && self
                .aliases
                .iter()
                .any(|a| a.same_values(&alias) && a.sources.contains(&record.key))
    }

    /// Remove a member; aliases it alone supported disappear
    pub fn detach(&mut self, key: &RecordKey) -> bool {
        if !self.members.remove(key) {
            return false;
        }
        for alias in &mut self.aliases {
            alias.sources.remove(key);
        }
        self.aliases.retain_mut(|a| a.recompute_span());
        true
    }

    /// Move `keys` out, returning the aliases they supported
    fn split_off(&mut self, keys: &BTreeSet<RecordKey>) -> Vec<Alias> {
        let mut moved = Vec::new();
        for alias in &mut self.aliases {
            let (leaving, staying): (BTreeSet<RecordKey>, BTreeSet<RecordKey>) =
                alias.sources.iter().cloned().partition(|k| keys.contains(k));
            if !leaving.is_empty() {
                let mut spawned = alias.clone();
                spawned.sources = leaving;
                spawned.recompute_span();
                moved.push(spawned);
                alias.sources = staying;
            }
        }
        self.aliases.retain_mut(|a| a.recompute_span());
        for key in keys {
            self.members.remove(key);
        }
        moved
    }

    fn merge_from(&mut self, other: &MasterEntity) {
        self.members.extend(other.members.iter().cloned());
        for alias in &other.aliases {
            self.absorb_alias(alias.clone());
        }
    }

    fn sort_aliases(&mut self) {
        self.aliases.sort_by(|a, b| {
            a.first_period
                .cmp(&b.first_period)
                .then(a.last_period.cmp(&b.last_period))
                .then(a.name.cmp(&b.name))
                .then(a.local_id.cmp(&b.local_id))
        });
    }

    /// Canonical name/ticker come from the most recently reported alias
    fn refresh_canonical(&mut self) {
        let latest = self
            .aliases
            .iter()
            .max_by(|a, b| {
                a.last_period
                    .cmp(&b.last_period)
                    .then_with(|| a.sources.iter().next_back().cmp(&b.sources.iter().next_back()))
            })
            .cloned();
        if let Some(alias) = latest {
            self.canonical_name = alias.name.clone();
            self.canonical_ticker = alias.ticker.clone().or_else(|| {
                self.aliases
                    .iter()
                    .rev()
                    .filter(|a| a.ticker.is_some())
                    .max_by_key(|a| a.last_period)
                    .and_then(|a| a.ticker.clone())
            });
        }
    }

    fn latest_period(&self) -> Option<PeriodId> {
        self.aliases.iter().map(|a| a.last_period).max()
    }

    /// Business-time validity of an alias; the most recent ones stay open
    pub fn alias_validity(&self, alias: &Alias) -> ValidityInterval {
        if Some(alias.last_period) == self.latest_period() {
            ValidityInterval::open(alias.first_period)
        } else {
            ValidityInterval::closed(alias.first_period, alias.last_period)
        }
    }

    /// What was this entity known as on `as_of`?
    pub fn known_as(&self, as_of: NaiveDate) -> Vec<&Alias> {
        self.aliases
            .iter()
            .filter(|a| self.alias_validity(a).contains(as_of))
            .collect()
    }
}

// ============================================================================
// COMMITS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Create,
    Extend,
    Refresh,
    Merge,
    Absorbed,
    Split,
    Spawn,
}

impl CommitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitKind::Create => "create",
            CommitKind::Extend => "extend",
            CommitKind::Refresh => "refresh",
            CommitKind::Merge => "merge",
            CommitKind::Absorbed => "absorbed",
            CommitKind::Split => "split",
            CommitKind::Spawn => "spawn",
        }
    }
}

/// Planned change to one master
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub master_id: MasterId,
    pub kind: EntityKind,

    /// Creation sequence when the master does not exist yet
    pub create_seq: Option<u64>,

    /// Records to add, or to refresh when already members
    pub upsert: Vec<PeriodRecord>,
    pub remove: Vec<RecordKey>,
    pub evidence: Vec<MergeEvidence>,
}

/// Logged result of one commit: evidence, membership diff, new version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit_id: String,
    pub master_id: MasterId,
    pub version: u64,
    pub kind: CommitKind,
    pub evidence: Vec<MergeEvidence>,
    pub added: Vec<RecordKey>,
    pub removed: Vec<RecordKey>,
    pub members_before: usize,
    pub members_after: usize,
    pub committed_at: DateTime<Utc>,

    /// The version this commit produced
    pub snapshot: MasterEntity,
}

impl CommitRecord {
    fn new(kind: CommitKind, entity: &MasterEntity, before: usize, added: Vec<RecordKey>, removed: Vec<RecordKey>, evidence: Vec<MergeEvidence>) -> Self {
        CommitRecord {
            commit_id: format!("{}@v{}", entity.id, entity.version),
            master_id: entity.id.clone(),
            version: entity.version,
            kind,
            evidence,
            added,
            removed,
            members_before: before,
            members_after: entity.members.len(),
            committed_at: entity.system_time,
            snapshot: entity.clone(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} v{} {}: +{} -{} ({} → {} members)",
            self.master_id,
            self.version,
            self.kind.as_str(),
            self.added.len(),
            self.removed.len(),
            self.members_before,
            self.members_after
        )
    }
}

// ============================================================================
// ALIAS LOOKUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum AliasQuery {
    Name {
        kind: Option<EntityKind>,
        name: String,
    },
    Ticker {
        ticker: String,
    },
    LocalId {
        kind: Option<EntityKind>,
        local_id: String,
        period: Option<PeriodId>,
    },
}

impl std::fmt::Display for AliasQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasQuery::Name { name, .. } => write!(f, "name {:?}", name),
            AliasQuery::Ticker { ticker } => write!(f, "ticker {}", ticker),
            AliasQuery::LocalId { local_id, period: Some(p), .. } => write!(f, "local id {} in {}", local_id, p),
            AliasQuery::LocalId { local_id, .. } => write!(f, "local id {}", local_id),
        }
    }
}

/// resolve(alias, as_of) result for external consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub master_id: MasterId,
    pub kind: EntityKind,
    pub canonical_name: String,
    pub canonical_ticker: Option<String>,
    pub matched_alias: Option<Alias>,
    pub as_of: NaiveDate,
}

// ============================================================================
// MASTER REGISTRY
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Every version ever committed, append-only
    versions: Vec<MasterEntity>,

    /// Index of each master's latest version
    current: HashMap<MasterId, usize>,

    /// AliasMapping: period record → master
    alias_map: BTreeMap<RecordKey, MasterId>,

    next_seq: u64,
}

impl RegistryState {
    fn current(&self, id: &MasterId) -> Option<&MasterEntity> {
        self.current.get(id).and_then(|&i| self.versions.get(i))
    }

    fn push(&mut self, entity: MasterEntity) {
        let idx = self.versions.len();
        self.current.insert(entity.id.clone(), idx);
        self.versions.push(entity);
    }

    /// Follow MergedInto links to the surviving master
    fn surviving(&self, id: &MasterId) -> Option<MasterId> {
        let mut cursor = id.clone();
        for _ in 0..=self.current.len() {
            match &self.current(&cursor)?.status {
                MasterStatus::Active => return Some(cursor),
                MasterStatus::MergedInto(next) => cursor = next.clone(),
            }
        }
        None
    }
}

pub struct MasterRegistry {
    state: RwLock<RegistryState>,
    cluster_locks: Mutex<HashMap<MasterId, Arc<Mutex<()>>>>,
    normalizer: NameNormalizer,
}

impl MasterRegistry {
    pub fn new(normalizer: NameNormalizer) -> Self {
        MasterRegistry {
            state: RwLock::new(RegistryState::default()),
            cluster_locks: Mutex::new(HashMap::new()),
            normalizer,
        }
    }

    fn cluster_locks_for(&self, ids: &[&MasterId]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted: Vec<&MasterId> = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut locks = self.cluster_locks.lock();
        sorted
            .into_iter()
            .map(|id| locks.entry(id.clone()).or_default().clone())
            .collect()
    }

    /// Next creation sequence number; callers allocate in sorted founder order
    pub fn allocate_seq(&self) -> u64 {
        let mut state = self.state.write();
        let seq = state.next_seq;
        state.next_seq += 1;
        seq
    }

    /// Apply one planned change under the master's cluster lock
    pub fn commit(&self, request: CommitRequest) -> Result<CommitRecord> {
        let locks = self.cluster_locks_for(&[&request.master_id]);
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        let existing = self.state.read().current(&request.master_id).cloned();
        let (mut entity, creating) = match (existing, request.create_seq) {
            (Some(e), _) => (e, false),
            (None, Some(seq)) => (MasterEntity::new(request.master_id.clone(), request.kind, seq), true),
            (None, None) => return Err(ConsolidationError::UnknownMaster(request.master_id.to_string())),
        };
        if !entity.is_active() {
            return Err(ConsolidationError::UnknownMaster(format!("{} is merged", entity.id)));
        }

        let before = entity.members.len();
        let mut removed = Vec::new();
        for key in &request.remove {
            if entity.detach(key) {
                removed.push(key.clone());
            }
        }
        let mut added = Vec::new();
        for record in &request.upsert {
            if !entity.members.contains(&record.key) {
                added.push(record.key.clone());
            }
            entity.absorb(record);
        }

        let kind = if creating {
            CommitKind::Create
        } else if added.is_empty() && removed.is_empty() {
            CommitKind::Refresh
        } else {
            CommitKind::Extend
        };

        entity.version += 1;
        entity.system_time = Utc::now();
        entity.refresh_canonical();
        entity.provenance.push(MergeProvenance {
            version: entity.version,
            kind,
            evidence: request.evidence.clone(),
            added: added.clone(),
            removed: removed.clone(),
        });

        let record = CommitRecord::new(kind, &entity, before, added, removed, request.evidence);
        {
            let mut state = self.state.write();
            for key in &record.removed {
                if state.alias_map.get(key) == Some(&entity.id) {
                    state.alias_map.remove(key);
                }
            }
            for key in &record.added {
                state.alias_map.insert(key.clone(), entity.id.clone());
            }
            state.next_seq = state.next_seq.max(entity.created_seq + 1);
            state.push(entity);
        }
        debug!("{}", record.summary());
        Ok(record)
    }

    /// Operator override: unify two established masters
    ///
    /// The earlier-created master survives and takes the other's members and
    /// alias history; the other is marked MergedInto, never deleted.
    pub fn merge(&self, a: &MasterId, b: &MasterId, evidence: MergeEvidence) -> Result<Vec<CommitRecord>> {
        let locks = self.cluster_locks_for(&[a, b]);
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        let (left, right) = {
            let state = self.state.read();
            let left = state
                .current(a)
                .cloned()
                .ok_or_else(|| ConsolidationError::UnknownMaster(a.to_string()))?;
            let right = state
                .current(b)
                .cloned()
                .ok_or_else(|| ConsolidationError::UnknownMaster(b.to_string()))?;
            (left, right)
        };
        if left.id == right.id {
            return Ok(Vec::new());
        }
        if left.kind != right.kind || !left.is_active() || !right.is_active() {
            return Err(ConsolidationError::InvalidDecision(format!(
                "cannot merge {} into {}",
                right.id, left.id
            )));
        }

        let (mut survivor, mut absorbed) = if left.created_seq <= right.created_seq {
            (left, right)
        } else {
            (right, left)
        };
        let now = Utc::now();
        let survivor_before = survivor.members.len();
        let absorbed_before = absorbed.members.len();
        let moved: Vec<RecordKey> = absorbed.members.iter().cloned().collect();

        survivor.merge_from(&absorbed);
        survivor.version += 1;
        survivor.system_time = now;
        survivor.refresh_canonical();
        survivor.provenance.push(MergeProvenance {
            version: survivor.version,
            kind: CommitKind::Merge,
            evidence: vec![evidence.clone()],
            added: moved.clone(),
            removed: Vec::new(),
        });

        absorbed.status = MasterStatus::MergedInto(survivor.id.clone());
        absorbed.version += 1;
        absorbed.system_time = now;
        absorbed.provenance.push(MergeProvenance {
            version: absorbed.version,
            kind: CommitKind::Absorbed,
            evidence: vec![evidence.clone()],
            added: Vec::new(),
            removed: moved.clone(),
        });

        let survivor_commit = CommitRecord::new(
            CommitKind::Merge,
            &survivor,
            survivor_before,
            moved.clone(),
            Vec::new(),
            vec![evidence.clone()],
        );
        let mut absorbed_commit = CommitRecord::new(
            CommitKind::Absorbed,
            &absorbed,
            absorbed_before,
            Vec::new(),
            moved.clone(),
            vec![evidence],
        );
        // The absorbed snapshot keeps its historical members for audit
        absorbed_commit.members_after = 0;

        {
            let mut state = self.state.write();
            for key in &moved {
                state.alias_map.insert(key.clone(), survivor.id.clone());
            }
            state.push(absorbed);
            state.push(survivor);
        }
        info!(
            survivor = %survivor_commit.master_id,
            absorbed = %absorbed_commit.master_id,
            "🔀 masters merged by override"
        );
        Ok(vec![survivor_commit, absorbed_commit])
    }

    /// Operator split: move `keys` out of `master` into a newly spawned master
    pub fn split(&self, master: &MasterId, keys: &BTreeSet<RecordKey>, evidence: MergeEvidence) -> Result<Vec<CommitRecord>> {
        let locks = self.cluster_locks_for(&[master]);
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        let mut parent = self
            .state
            .read()
            .current(master)
            .cloned()
            .ok_or_else(|| ConsolidationError::UnknownMaster(master.to_string()))?;
        if !parent.is_active() {
            return Err(ConsolidationError::InvalidDecision(format!("{} is merged", master)));
        }
        if keys.is_empty() || !keys.iter().all(|k| parent.members.contains(k)) {
            return Err(ConsolidationError::InvalidDecision(format!(
                "split keys are not all members of {}",
                master
            )));
        }
        if keys.len() == parent.members.len() {
            return Err(ConsolidationError::InvalidDecision(
                "split must leave at least one member behind".to_string(),
            ));
        }

        let seq = self.allocate_seq();
        let now = Utc::now();
        let parent_before = parent.members.len();
        let moving: Vec<RecordKey> = keys.iter().cloned().collect();

        let spawn_id = MasterId::for_split(parent.kind, &parent.id, parent.version + 1);
        let mut spawn = MasterEntity::new(spawn_id, parent.kind, seq);
        for alias in parent.split_off(keys) {
            spawn.absorb_alias(alias);
        }
        spawn.members.extend(moving.iter().cloned());
        spawn.version = 1;
        spawn.system_time = now;
        spawn.refresh_canonical();
        spawn.provenance.push(MergeProvenance {
            version: 1,
            kind: CommitKind::Spawn,
            evidence: vec![evidence.clone()],
            added: moving.clone(),
            removed: Vec::new(),
        });

        parent.version += 1;
        parent.system_time = now;
        parent.refresh_canonical();
        parent.provenance.push(MergeProvenance {
            version: parent.version,
            kind: CommitKind::Split,
            evidence: vec![evidence.clone()],
            added: Vec::new(),
            removed: moving.clone(),
        });

        let parent_commit = CommitRecord::new(
            CommitKind::Split,
            &parent,
            parent_before,
            Vec::new(),
            moving.clone(),
            vec![evidence.clone()],
        );
        let spawn_commit = CommitRecord::new(CommitKind::Spawn, &spawn, 0, moving.clone(), Vec::new(), vec![evidence]);

        {
            let mut state = self.state.write();
            for key in &moving {
                state.alias_map.insert(key.clone(), spawn.id.clone());
            }
            state.push(parent);
            state.push(spawn);
        }
        info!(parent = %parent_commit.master_id, spawn = %spawn_commit.master_id, moved = moving.len(), "✂️ master split");
        Ok(vec![parent_commit, spawn_commit])
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Current version of a master
    pub fn get(&self, id: &MasterId) -> Option<MasterEntity> {
        self.state.read().current(id).cloned()
    }

    /// Every version of a master, oldest first
    pub fn all_versions(&self, id: &MasterId) -> Vec<MasterEntity> {
        self.state
            .read()
            .versions
            .iter()
            .filter(|m| &m.id == id)
            .cloned()
            .collect()
    }

    /// Surviving master for an id (follows merges)
    pub fn surviving(&self, id: &MasterId) -> Option<MasterId> {
        self.state.read().surviving(id)
    }

    /// AliasMapping lookup for one period record
    pub fn master_for(&self, key: &RecordKey) -> Option<MasterId> {
        let state = self.state.read();
        let id = state.alias_map.get(key)?;
        state.surviving(id)
    }

    /// Snapshot of the whole AliasMapping
    pub fn alias_mapping(&self) -> BTreeMap<RecordKey, MasterId> {
        self.state.read().alias_map.clone()
    }

    pub fn active_masters(&self) -> Vec<MasterEntity> {
        let state = self.state.read();
        let mut masters: Vec<MasterEntity> = state
            .current
            .values()
            .filter_map(|&i| state.versions.get(i))
            .filter(|m| m.is_active())
            .cloned()
            .collect();
        masters.sort_by(|a, b| a.created_seq.cmp(&b.created_seq).then(a.id.cmp(&b.id)));
        masters
    }

    pub fn master_count(&self) -> usize {
        self.state.read().current.len()
    }

    /// Aliases of a master valid on a date
    pub fn known_as(&self, id: &MasterId, as_of: NaiveDate) -> Result<Vec<Alias>> {
        let entity = self
            .get(id)
            .ok_or_else(|| ConsolidationError::UnknownMaster(id.to_string()))?;
        Ok(entity.known_as(as_of).into_iter().cloned().collect())
    }

    /// resolve(alias, as_of) → master + current canonical name/ticker
    ///
    /// `Ok(None)` when nothing matches; `AmbiguousAlias` when several
    /// masters carried the alias on that date.
    pub fn resolve(&self, query: &AliasQuery, as_of: NaiveDate) -> Result<Option<Resolution>> {
        let state = self.state.read();
        let mut hits: BTreeMap<MasterId, Option<Alias>> = BTreeMap::new();

        if let AliasQuery::LocalId { kind, local_id, period: Some(period) } = query {
            let local_id = normalize_local_id(local_id)?;
            for k in kinds(*kind) {
                let key = RecordKey::new(k, *period, local_id.clone());
                if let Some(id) = state.alias_map.get(&key).and_then(|id| state.surviving(id)) {
                    let alias = state
                        .current(&id)
                        .and_then(|m| m.aliases.iter().find(|a| a.sources.contains(&key)).cloned());
                    hits.insert(id, alias);
                }
            }
        } else {
            for &idx in state.current.values() {
                let Some(master) = state.versions.get(idx) else { continue };
                if !master.is_active() {
                    continue;
                }
                for alias in master.known_as(as_of) {
                    if self.alias_matches(master.kind, alias, query) {
                        hits.entry(master.id.clone()).or_insert_with(|| Some(alias.clone()));
                    }
                }
            }
        }

        if hits.len() > 1 {
            return Err(ConsolidationError::AmbiguousAlias {
                query: query.to_string(),
                masters: hits.into_keys().collect(),
            });
        }
        Ok(hits.into_iter().next().and_then(|(id, alias)| {
            state.current(&id).map(|m| Resolution {
                master_id: m.id.clone(),
                kind: m.kind,
                canonical_name: m.canonical_name.clone(),
                canonical_ticker: m.canonical_ticker.clone(),
                matched_alias: alias,
                as_of,
            })
        }))
    }

    fn alias_matches(&self, kind: EntityKind, alias: &Alias, query: &AliasQuery) -> bool {
        match query {
            AliasQuery::Name { kind: wanted, name } => {
                wanted.map_or(true, |w| w == kind)
                    && self.normalizer.normalize(kind, name) == self.normalizer.normalize(kind, &alias.name)
            }
            AliasQuery::Ticker { ticker } => {
                kind == EntityKind::Company && clean_ticker(ticker).is_some() && alias.ticker == clean_ticker(ticker)
            }
            AliasQuery::LocalId { kind: wanted, local_id, .. } => {
                wanted.map_or(true, |w| w == kind)
                    && normalize_local_id(local_id).map(|id| id == alias.local_id).unwrap_or(false)
            }
        }
    }

    // ========================================================================
    // PERSISTENCE SUPPORT
    // ========================================================================

    /// Replace all state with persisted versions and mapping
    pub fn restore(&self, versions: Vec<MasterEntity>, alias_map: BTreeMap<RecordKey, MasterId>) {
        let mut state = self.state.write();
        *state = RegistryState::default();
        for entity in versions {
            state.next_seq = state.next_seq.max(entity.created_seq + 1);
            state.push(entity);
        }
        state.alias_map = alias_map;
        info!(masters = state.current.len(), aliases = state.alias_map.len(), "registry restored");
    }
}

impl Default for MasterRegistry {
    fn default() -> Self {
        MasterRegistry::new(NameNormalizer::default())
    }
}

fn kinds(kind: Option<EntityKind>) -> Vec<EntityKind> {
    match kind {
        Some(k) => vec![k],
        None => vec![EntityKind::Company, EntityKind::Insider],
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ListingStatus, RecordDetail};

    fn q(year: i32, quarter: u8) -> PeriodId {
        PeriodId::quarter(year, quarter).unwrap()
    }

    fn create_test_company(period: PeriodId, local_id: &str, name: &str, ticker: &str) -> PeriodRecord {
        PeriodRecord {
            key: RecordKey::company(period, normalize_local_id(local_id).unwrap()),
            raw_local_id: local_id.to_string(),
            name: name.to_string(),
            detail: RecordDetail::Company {
                ticker: Some(ticker.to_string()),
                status: ListingStatus::Unknown,
            },
            source_tag: "test".to_string(),
        }
    }

    fn create_master(registry: &MasterRegistry, records: Vec<PeriodRecord>) -> MasterId {
        let founder = records.iter().map(|r| r.key.clone()).min().unwrap();
        let id = MasterId::for_founder(&founder);
        let seq = registry.allocate_seq();
        registry
            .commit(CommitRequest {
                master_id: id.clone(),
                kind: EntityKind::Company,
                create_seq: Some(seq),
                upsert: records,
                remove: vec![],
                evidence: vec![MergeEvidence::automatic("test")],
            })
            .unwrap();
        id
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_create_and_extend_versions() {
        let registry = MasterRegistry::default();
        let a = create_test_company(q(2006, 1), "123", "Acme Corp", "ACM");
        let id = create_master(&registry, vec![a.clone()]);

        let b = create_test_company(q(2025, 2), "999", "Acme Corporation", "ACM");
        let commit = registry
            .commit(CommitRequest {
                master_id: id.clone(),
                kind: EntityKind::Company,
                create_seq: None,
                upsert: vec![b.clone()],
                remove: vec![],
                evidence: vec![MergeEvidence::automatic("accepted")],
            })
            .unwrap();

        assert_eq!(commit.kind, CommitKind::Extend);
        assert_eq!(commit.version, 2);
        assert_eq!(commit.members_before, 1);
        assert_eq!(commit.members_after, 2);
        assert_eq!(registry.all_versions(&id).len(), 2);

        let master = registry.get(&id).unwrap();
        assert_eq!(master.canonical_name, "Acme Corporation");
        assert_eq!(master.aliases.len(), 2);
        assert_eq!(registry.master_for(&a.key), Some(id.clone()));
        assert_eq!(registry.master_for(&b.key), Some(id));
        println!("✅ Create/extend versions PASSED");
    }

    #[test]
    fn test_commit_to_unknown_master_fails() {
        let registry = MasterRegistry::default();
        let err = registry
            .commit(CommitRequest {
                master_id: MasterId::from_raw("MC-missing"),
                kind: EntityKind::Company,
                create_seq: None,
                upsert: vec![],
                remove: vec![],
                evidence: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::UnknownMaster(_)));
    }

    #[test]
    fn test_as_of_resolution() {
        let registry = MasterRegistry::default();
        let id = create_master(
            &registry,
            vec![
                create_test_company(q(2006, 1), "123", "Acme Corp", "ACM"),
                create_test_company(q(2008, 4), "123", "Acme Corp", "ACM"),
                create_test_company(q(2015, 1), "123", "Acme Worldwide", "ACMW"),
            ],
        );

        let old = registry
            .resolve(&AliasQuery::Ticker { ticker: "acm".into() }, date(2007, 5, 1))
            .unwrap()
            .unwrap();
        assert_eq!(old.master_id, id);
        assert_eq!(old.canonical_name, "Acme Worldwide");
        assert_eq!(old.canonical_ticker.as_deref(), Some("ACMW"));

        // ACM alias closed at the end of 2008Q4
        assert!(registry
            .resolve(&AliasQuery::Ticker { ticker: "ACM".into() }, date(2012, 1, 1))
            .unwrap()
            .is_none());

        // The latest alias stays open
        let now = registry
            .resolve(&AliasQuery::Name { kind: None, name: "ACME WORLDWIDE INC".into() }, date(2030, 1, 1))
            .unwrap();
        assert_eq!(now.map(|r| r.master_id), Some(id.clone()));

        let by_id = registry
            .resolve(
                &AliasQuery::LocalId { kind: None, local_id: "123".into(), period: Some(q(2008, 4)) },
                date(2008, 11, 1),
            )
            .unwrap()
            .unwrap();
        assert_eq!(by_id.master_id, id);

        assert_eq!(registry.known_as(&id, date(2007, 1, 1)).unwrap().len(), 1);
    }

    #[test]
    fn test_ambiguous_alias_reported() {
        let registry = MasterRegistry::default();
        create_master(&registry, vec![create_test_company(q(2006, 1), "1", "Acme", "ACM")]);
        create_master(&registry, vec![create_test_company(q(2006, 1), "2", "Acme", "ACX")]);

        let err = registry
            .resolve(&AliasQuery::Name { kind: None, name: "Acme".into() }, date(2006, 2, 1))
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::AmbiguousAlias { ref masters, .. } if masters.len() == 2));
    }

    #[test]
    fn test_merge_keeps_earlier_created() {
        let registry = MasterRegistry::default();
        let first = create_master(&registry, vec![create_test_company(q(2006, 1), "1", "Acme", "ACM")]);
        let second = create_master(&registry, vec![create_test_company(q(2007, 1), "2", "Acme Inc", "ACM")]);

        let commits = registry
            .merge(&second, &first, MergeEvidence::automatic("override"))
            .unwrap();
        assert_eq!(commits[0].master_id, first);
        assert_eq!(commits[0].kind, CommitKind::Merge);
        assert_eq!(commits[1].master_id, second);

        let absorbed = registry.get(&second).unwrap();
        assert_eq!(absorbed.status, MasterStatus::MergedInto(first.clone()));
        assert_eq!(registry.surviving(&second), Some(first.clone()));
        assert_eq!(registry.get(&first).unwrap().members.len(), 2);
        assert!(registry
            .alias_mapping()
            .values()
            .all(|m| m == &first));
    }

    #[test]
    fn test_split_spawns_new_master() {
        let registry = MasterRegistry::default();
        let a = create_test_company(q(2006, 1), "1", "Acme", "ACM");
        let b = create_test_company(q(2007, 1), "1", "Acme", "ACM");
        let c = create_test_company(q(2008, 1), "7", "Apex Mining", "APX");
        let id = create_master(&registry, vec![a.clone(), b.clone(), c.clone()]);

        let mut keys = BTreeSet::new();
        keys.insert(c.key.clone());
        let commits = registry
            .split(&id, &keys, MergeEvidence::automatic("wrong merge"))
            .unwrap();
        let spawn_id = commits[1].master_id.clone();

        assert_ne!(spawn_id, id);
        assert_eq!(registry.master_for(&c.key), Some(spawn_id.clone()));
        assert_eq!(registry.master_for(&a.key), Some(id.clone()));

        let parent = registry.get(&id).unwrap();
        assert_eq!(parent.members.len(), 2);
        assert!(parent.aliases.iter().all(|al| al.name == "Acme"));

        let spawn = registry.get(&spawn_id).unwrap();
        assert_eq!(spawn.canonical_name, "Apex Mining");
        assert!(spawn.created_seq > parent.created_seq);

        // Splitting everything out is refused
        let all: BTreeSet<RecordKey> = parent.members.clone();
        assert!(registry.split(&id, &all, MergeEvidence::automatic("x")).is_err());
    }

    #[test]
    fn test_refresh_replaces_alias_of_revised_record() {
        let registry = MasterRegistry::default();
        let a = create_test_company(q(2006, 1), "1", "Acme Crop", "ACM");
        let id = create_master(&registry, vec![a.clone()]);

        let mut fixed = a.clone();
        fixed.name = "Acme Corp".to_string();
        let commit = registry
            .commit(CommitRequest {
                master_id: id.clone(),
                kind: EntityKind::Company,
                create_seq: None,
                upsert: vec![fixed],
                remove: vec![],
                evidence: vec![MergeEvidence::automatic("record revised")],
            })
            .unwrap();

        assert_eq!(commit.kind, CommitKind::Refresh);
        let master = registry.get(&id).unwrap();
        assert_eq!(master.aliases.len(), 1);
        assert_eq!(master.canonical_name, "Acme Corp");
    }

    #[test]
    fn test_restore_round_trip() {
        let registry = MasterRegistry::default();
        let id = create_master(&registry, vec![create_test_company(q(2006, 1), "1", "Acme", "ACM")]);
        let versions = registry.all_versions(&id);
        let mapping = registry.alias_mapping();

        let restored = MasterRegistry::default();
        restored.restore(versions, mapping.clone());
        assert_eq!(restored.alias_mapping(), mapping);
        assert_eq!(restored.get(&id).unwrap().version, 1);
        assert_eq!(restored.allocate_seq(), 1);
    }
}
