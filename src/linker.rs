// 🔗 Transaction Linker - period-local references → master identities
//
// A transaction links only when BOTH its company and its insider resolve
// through the alias mapping. Anything else is quarantined with the reference
// that failed; a transaction is never dropped silently.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RecordError;
use crate::records::{LinkedTransaction, MasterId, QuarantineStage, Quarantined, RecordKey, TransactionRecord};
use crate::registry::MasterRegistry;

// ============================================================================
// LINK REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkReport {
    pub linked: Vec<LinkedTransaction>,
    pub quarantined: Vec<Quarantined>,
}

impl LinkReport {
    pub fn total(&self) -> usize {
        self.linked.len() + self.quarantined.len()
    }

    /// Every input transaction is either linked or quarantined
    pub fn is_complete(&self, inputs: usize) -> bool {
        self.total() == inputs
    }

    pub fn summary(&self) -> String {
        format!(
            "{} linked, {} quarantined ({} total)",
            self.linked.len(),
            self.quarantined.len(),
            self.total()
        )
    }
}

// ============================================================================
// LINKER
// ============================================================================

#[derive(Debug, Default)]
pub struct TransactionLinker;

impl TransactionLinker {
    pub fn new() -> Self {
        TransactionLinker
    }

    /// Link one transaction against the current alias mapping
    pub fn link_one(
        &self,
        registry: &MasterRegistry,
        tx: &TransactionRecord,
    ) -> Result<LinkedTransaction, RecordError> {
        let company = resolve_reference(registry, tx.company_key())?;
        let insider = resolve_reference(registry, tx.insider_key())?;
        Ok(LinkedTransaction {
            record: tx.clone(),
            master_company_id: company,
            master_insider_id: insider,
        })
    }

    /// Parallel read-only pass; output order follows input order
    pub fn link<'a, I>(&self, registry: &MasterRegistry, transactions: I) -> LinkReport
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        let inputs: Vec<&TransactionRecord> = transactions.into_iter().collect();
        let results: Vec<Result<LinkedTransaction, Quarantined>> = inputs
            .par_iter()
            .map(|tx| {
                self.link_one(registry, tx).map_err(|error| Quarantined {
                    stage: QuarantineStage::Linker,
                    period: tx.period,
                    source: tx.id.clone(),
                    error,
                })
            })
            .collect();

        let mut report = LinkReport::default();
        for result in results {
            match result {
                Ok(linked) => report.linked.push(linked),
                Err(quarantined) => report.quarantined.push(quarantined),
            }
        }

        if !report.quarantined.is_empty() {
            warn!(count = report.quarantined.len(), "transactions quarantined at linking");
        }
        info!("🔗 {}", report.summary());
        report
    }
}

fn resolve_reference(
    registry: &MasterRegistry,
    key: RecordKey,
) -> Result<MasterId, RecordError> {
    registry
        .master_for(&key)
        .ok_or_else(|| RecordError::UnresolvedReference {
            kind: key.kind,
            period: key.period,
            local_id: key.local_id.clone(),
        })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{EntityKind, ListingStatus, PeriodRecord, RecordDetail, RoleFlags};
    use crate::registry::{CommitRequest, MergeEvidence};
    use crate::temporal::PeriodId;
    use chrono::NaiveDate;

    fn q() -> PeriodId {
        PeriodId::quarter(2006, 1).unwrap()
    }

    fn create_test_transaction(company: &str, insider: &str) -> TransactionRecord {
        TransactionRecord::new(
            q(),
            company.to_string(),
            insider.to_string(),
            NaiveDate::from_ymd_opt(2006, 2, 1).unwrap(),
            "P".to_string(),
            100.0,
            Some(10.0),
            Some("A".to_string()),
            "test".to_string(),
            format!("{}-{}", company, insider),
        )
    }

    fn register(registry: &MasterRegistry, record: PeriodRecord) -> MasterId {
        let id = MasterId::for_founder(&record.key);
        let seq = registry.allocate_seq();
        registry
            .commit(CommitRequest {
                master_id: id.clone(),
                kind: record.kind(),
                create_seq: Some(seq),
                upsert: vec![record],
                remove: vec![],
                evidence: vec![MergeEvidence::automatic("test")],
            })
            .unwrap();
        id
    }

    fn create_registry() -> (MasterRegistry, MasterId, MasterId) {
        let registry = MasterRegistry::default();
        let company = register(
            &registry,
            PeriodRecord {
                key: RecordKey::company(q(), "0000000001"),
                raw_local_id: "1".to_string(),
                name: "Acme Corp".to_string(),
                detail: RecordDetail::Company { ticker: Some("ACM".to_string()), status: ListingStatus::Listed },
                source_tag: "test".to_string(),
            },
        );
        let insider = register(
            &registry,
            PeriodRecord {
                key: RecordKey::insider(q(), "0000000100"),
                raw_local_id: "100".to_string(),
                name: "SMITH JOHN".to_string(),
                detail: RecordDetail::Insider {
                    roles: RoleFlags { director: true, ..Default::default() },
                    title: None,
                },
                source_tag: "test".to_string(),
            },
        );
        (registry, company, insider)
    }

    #[test]
    fn test_link_resolves_both_references() {
        let (registry, company, insider) = create_registry();
        let tx = create_test_transaction("0000000001", "0000000100");

        let linked = TransactionLinker::new().link_one(&registry, &tx).unwrap();
        assert_eq!(linked.master_company_id, company);
        assert_eq!(linked.master_insider_id, insider);
        println!("✅ Transaction linking PASSED");
    }

    #[test]
    fn test_unresolved_reference_is_quarantined() {
        let (registry, _, _) = create_registry();
        let good = create_test_transaction("0000000001", "0000000100");
        let orphan = create_test_transaction("0000000001", "0000000999");
        let inputs = vec![good, orphan.clone()];

        let report = TransactionLinker::new().link(&registry, &inputs);

        assert!(report.is_complete(inputs.len()));
        assert_eq!(report.linked.len(), 1);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.quarantined[0].source, orphan.id);
        assert_eq!(report.quarantined[0].stage, QuarantineStage::Linker);
        assert!(matches!(
            report.quarantined[0].error,
            RecordError::UnresolvedReference { kind: EntityKind::Insider, .. }
        ));
        assert_eq!(report.quarantined[0].reason_code(), "UNRESOLVED_REFERENCE");
    }
}
