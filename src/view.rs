// 📊 Consolidated View - one continuous history across all periods
//
// Linked transactions joined with each master's current canonical name and
// ticker. Queried by master identifier, so a company that renamed or
// re-registered shows a single uninterrupted trade history.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::records::{LinkedTransaction, MasterId};
use crate::registry::MasterRegistry;
use crate::temporal::PeriodId;

/// Label for a Form 4 transaction code
pub fn describe_code(code: &str) -> &'static str {
    match code.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('P') | Some('A') => "BUY",
        Some('S') | Some('D') => "SELL",
        Some('M') => "OPTION_EXERCISE",
        Some('F') => "TAX_WITHHOLDING",
        Some('G') => "GIFT",
        Some('C') => "CONVERSION",
        _ => "OTHER",
    }
}

/// One row of the consolidated history (also the CSV export layout)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedTransaction {
    pub transaction_id: String,
    pub period: PeriodId,
    pub transaction_date: chrono::NaiveDate,
    pub master_company_id: MasterId,
    pub company_name: String,
    pub ticker: Option<String>,
    pub master_insider_id: MasterId,
    pub insider_name: String,
    pub transaction_code: String,
    pub transaction_type: String,
    pub shares: f64,
    pub price: Option<f64>,
    pub value: Option<f64>,
    pub acquired_disposed: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidatedView {
    rows: Vec<ConsolidatedTransaction>,
}

impl ConsolidatedView {
    /// Join linked transactions with the registry's current canonical values
    pub fn build(registry: &MasterRegistry, linked: &[LinkedTransaction]) -> Self {
        let mut names: HashMap<MasterId, (MasterId, String, Option<String>)> = HashMap::new();
        let mut lookup = |id: &MasterId| {
            names
                .entry(id.clone())
                .or_insert_with(|| {
                    let surviving = registry.surviving(id).unwrap_or_else(|| id.clone());
                    match registry.get(&surviving) {
                        Some(m) => (surviving, m.canonical_name, m.canonical_ticker),
                        None => (surviving, String::new(), None),
                    }
                })
                .clone()
        };

        let mut rows: Vec<ConsolidatedTransaction> = linked
            .iter()
            .map(|tx| {
                let (company_id, company_name, ticker) = lookup(&tx.master_company_id);
                let (insider_id, insider_name, _) = lookup(&tx.master_insider_id);
                let record = &tx.record;
                ConsolidatedTransaction {
                    transaction_id: record.id.clone(),
                    period: record.period,
                    transaction_date: record.transaction_date,
                    master_company_id: company_id,
                    company_name,
                    ticker,
                    master_insider_id: insider_id,
                    insider_name,
                    transaction_code: record.transaction_code.clone(),
                    transaction_type: describe_code(&record.transaction_code).to_string(),
                    shares: record.shares,
                    price: record.price,
                    value: record.value,
                    acquired_disposed: record.acquired_disposed.clone(),
                    source: record.source_tag.clone(),
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.master_company_id.cmp(&b.master_company_id))
                .then_with(|| a.master_insider_id.cmp(&b.master_insider_id))
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        ConsolidatedView { rows }
    }

    pub fn rows(&self) -> &[ConsolidatedTransaction] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full trade history of a company master, oldest first
    pub fn for_company(&self, id: &MasterId) -> Vec<&ConsolidatedTransaction> {
        self.rows.iter().filter(|r| &r.master_company_id == id).collect()
    }

    pub fn for_insider(&self, id: &MasterId) -> Vec<&ConsolidatedTransaction> {
        self.rows.iter().filter(|r| &r.master_insider_id == id).collect()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let file = std::fs::File::create(path)?;
        self.write_csv_to(file)
    }

    pub fn write_csv_to<W: Write>(&self, writer: W) -> Result<usize> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(self.rows.len())
    }
}
