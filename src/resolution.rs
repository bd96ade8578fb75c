// 🧩 Resolution Engine - accepted candidates → master identities
//
// Equivalence classes live in a union-find keyed by RecordId. Planning is
// serial and ordered (strongest candidate first) so the outcome never
// depends on thread scheduling; only the registry commits run in parallel.
//
// Rules:
// - a pair already in one class is a no-op
// - joining two classes that both carry an established master is a Conflict,
//   never a silent merge
// - a class without a master gets one, named after its smallest record key

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::error::{ConsolidationError, RecordError, Result};
use crate::matcher::MatchCandidate;
use crate::period_store::PeriodStore;
use crate::records::{MasterId, RecordId, RecordKey};
use crate::registry::{CommitRecord, CommitRequest, MasterRegistry, MergeEvidence};
use crate::union_find::UnionFind;

/// An accepted candidate that would have merged two established masters
#[derive(Debug, Clone)]
pub struct ConflictReport {
    pub candidate: MatchCandidate,
    pub error: RecordError,
}

#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub commits: Vec<CommitRecord>,
    pub conflicts: Vec<ConflictReport>,

    /// Accepted pairs that joined two classes
    pub unions: usize,

    /// Accepted pairs already in one class
    pub already_joined: usize,
}

impl ResolveOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} commits, {} unions, {} already joined, {} conflicts",
            self.commits.len(),
            self.unions,
            self.already_joined,
            self.conflicts.len()
        )
    }
}

#[derive(Debug, Default)]
pub struct ResolutionEngine {
    classes: UnionFind,
}

impl ResolutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the classes from the registry's alias mapping
    pub fn rebuild(&mut self, store: &PeriodStore, registry: &MasterRegistry) {
        self.classes = UnionFind::new(store.len());
        let mut first_member: HashMap<MasterId, RecordId> = HashMap::new();
        for (key, master) in registry.alias_mapping() {
            let Some(id) = store.id_of(&key) else { continue };
            let master = registry.surviving(&master).unwrap_or(master);
            match first_member.get(&master) {
                Some(&anchor) => {
                    self.classes.union(anchor, id);
                }
                None => {
                    first_member.insert(master, id);
                }
            }
        }
        debug!(records = store.len(), masters = first_member.len(), "classes rebuilt");
    }

    pub fn same_class(&mut self, store: &PeriodStore, a: &RecordKey, b: &RecordKey) -> bool {
        self.classes.grow(store.len());
        match (store.id_of(a), store.id_of(b)) {
            (Some(a), Some(b)) => self.classes.same(a, b),
            _ => false,
        }
    }

    /// Apply accepted candidates and give every dirty record a master
    pub fn resolve(
        &mut self,
        store: &PeriodStore,
        registry: &MasterRegistry,
        accepted: &[MatchCandidate],
        dirty: &[RecordId],
    ) -> Result<ResolveOutcome> {
        self.classes.grow(store.len());
        let mut outcome = ResolveOutcome::default();

        // Established master per class root
        let mut class_master: HashMap<RecordId, MasterId> = HashMap::new();
        for (id, record) in store.records() {
            if let Some(master) = registry.master_for(&record.key) {
                let root = self.classes.find(id);
                class_master.insert(root, master);
            }
        }

        let mut ordered: Vec<&MatchCandidate> = accepted.iter().collect();
        ordered.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        let mut evidence: HashMap<RecordId, Vec<MergeEvidence>> = HashMap::new();
        let mut touched: BTreeSet<RecordId> = dirty.iter().copied().collect();

        for candidate in ordered {
            let (Some(a), Some(b)) = (store.id_of(&candidate.left), store.id_of(&candidate.right)) else {
                warn!(candidate = %candidate.id.short(), "candidate references unknown records, skipping");
                continue;
            };
            let (ra, rb) = (self.classes.find(a), self.classes.find(b));
            if ra == rb {
                outcome.already_joined += 1;
                continue;
            }

            let (ma, mb) = (class_master.get(&ra).cloned(), class_master.get(&rb).cloned());
            if let (Some(left), Some(right)) = (&ma, &mb) {
                if left != right {
                    warn!(
                        candidate = %candidate.id.short(),
                        left = %left,
                        right = %right,
                        "⚠️ accepted candidate joins two established masters, routing to review"
                    );
                    outcome.conflicts.push(ConflictReport {
                        candidate: candidate.clone(),
                        error: RecordError::Conflict {
                            left: left.clone(),
                            right: right.clone(),
                            candidate: Some(candidate.id.clone()),
                        },
                    });
                    continue;
                }
            }

            let Some(root) = self.classes.union(a, b) else { continue };
            outcome.unions += 1;
            class_master.remove(&ra);
            class_master.remove(&rb);
            if let Some(master) = ma.or(mb) {
                class_master.insert(root, master);
            }

            let mut merged = evidence.remove(&ra).unwrap_or_default();
            merged.extend(evidence.remove(&rb).unwrap_or_default());
            merged.push(MergeEvidence::from_candidate(
                &candidate.id,
                candidate.score,
                &candidate.reason,
                candidate.decided_by.as_deref().unwrap_or("matcher"),
            ));
            evidence.insert(root, merged);
            touched.insert(a);
            touched.insert(b);
        }

        let requests = self.plan_commits(store, registry, &class_master, &touched, &mut evidence);
        if !requests.is_empty() {
            let mut commits: Vec<CommitRecord> = requests
                .into_par_iter()
                .map(|request| registry.commit(request))
                .collect::<Result<Vec<_>>>()?;
            commits.sort_by(|a, b| {
                a.snapshot
                    .created_seq
                    .cmp(&b.snapshot.created_seq)
                    .then_with(|| a.master_id.cmp(&b.master_id))
            });
            outcome.commits = commits;
        }

        info!("🧩 resolution: {}", outcome.summary());
        Ok(outcome)
    }

    fn plan_commits(
        &mut self,
        store: &PeriodStore,
        registry: &MasterRegistry,
        class_master: &HashMap<RecordId, MasterId>,
        touched: &BTreeSet<RecordId>,
        evidence: &mut HashMap<RecordId, Vec<MergeEvidence>>,
    ) -> Vec<CommitRequest> {
        if touched.is_empty() {
            return Vec::new();
        }
        let roots: BTreeSet<RecordId> = touched.iter().map(|&id| self.classes.find(id)).collect();
        let classes = self.classes.classes();

        let mut existing = Vec::new();
        let mut fresh: BTreeMap<RecordKey, (RecordId, Vec<RecordId>)> = BTreeMap::new();
        for root in roots {
            let Some(members) = classes.get(&root) else { continue };
            match class_master.get(&root) {
                Some(master) => existing.push((root, master.clone(), members.clone())),
                None => {
                    if let Some(founder) = members.iter().filter_map(|&m| store.key(m)).min() {
                        fresh.insert(founder.clone(), (root, members.clone()));
                    }
                }
            }
        }

        let mut requests = Vec::new();

        for (root, master_id, members) in existing {
            let Some(master) = registry.get(&master_id) else { continue };
            let upsert: Vec<_> = members
                .iter()
                .filter_map(|&m| store.get(m))
                .filter(|record| !master.reflects(record))
                .cloned()
                .collect();
            if upsert.is_empty() {
                continue;
            }
            let evidence = evidence
                .remove(&root)
                .unwrap_or_else(|| vec![MergeEvidence::automatic("record revised")]);
            requests.push(CommitRequest {
                master_id,
                kind: master.kind,
                create_seq: None,
                upsert,
                remove: Vec::new(),
                evidence,
            });
        }

        // New masters get creation order from their founder keys
        for (founder, (root, members)) in fresh {
            let mut master_id = MasterId::for_founder(&founder);
            let seq = registry.allocate_seq();
            if registry.get(&master_id).is_some() {
                master_id = MasterId::derive(founder.kind, &format!("{}#{}", founder, seq));
            }
            let upsert: Vec<_> = members.iter().filter_map(|&m| store.get(m)).cloned().collect();
            let evidence = evidence
                .remove(&root)
                .unwrap_or_else(|| vec![MergeEvidence::automatic("unmatched record")]);
            requests.push(CommitRequest {
                master_id,
                kind: founder.kind,
                create_seq: Some(seq),
                upsert,
                remove: Vec::new(),
                evidence,
            });
        }
        requests
    }

    /// Operator override of a Conflict: merge the two masters behind the pair
    pub fn override_conflict(
        &mut self,
        store: &PeriodStore,
        registry: &MasterRegistry,
        candidate: &MatchCandidate,
        operator: &str,
        note: &str,
    ) -> Result<Vec<CommitRecord>> {
        self.classes.grow(store.len());
        let (Some(a), Some(b)) = (store.id_of(&candidate.left), store.id_of(&candidate.right)) else {
            return Err(ConsolidationError::UnknownRecord(candidate.left.to_string()));
        };
        let left = registry
            .master_for(&candidate.left)
            .ok_or_else(|| ConsolidationError::UnknownRecord(candidate.left.to_string()))?;
        let right = registry
            .master_for(&candidate.right)
            .ok_or_else(|| ConsolidationError::UnknownRecord(candidate.right.to_string()))?;
        if left == right {
            self.classes.union(a, b);
            return Ok(Vec::new());
        }

        let evidence = MergeEvidence::from_candidate(&candidate.id, candidate.score, note, operator);
        let commits = registry.merge(&left, &right, evidence)?;
        self.classes.union(a, b);
        Ok(commits)
    }

    /// Operator split: move `keys` out of their shared master
    pub fn split(
        &mut self,
        store: &PeriodStore,
        registry: &MasterRegistry,
        keys: &BTreeSet<RecordKey>,
        operator: &str,
        note: &str,
    ) -> Result<Vec<CommitRecord>> {
        let mut masters = BTreeSet::new();
        for key in keys {
            let master = registry
                .master_for(key)
                .ok_or_else(|| ConsolidationError::UnknownRecord(key.to_string()))?;
            masters.insert(master);
        }
        let master = match masters.len() {
            1 => masters.into_iter().next(),
            _ => None,
        }
        .ok_or_else(|| ConsolidationError::InvalidDecision("split records must share one master".to_string()))?;

        let evidence = MergeEvidence {
            candidate: None,
            score: None,
            reason: note.to_string(),
            actor: operator.to_string(),
        };
        let commits = registry.split(&master, keys, evidence)?;
        self.rebuild(store, registry);
        Ok(commits)
    }
}

// ============================================================================
// TESTS
// ============================================================================
