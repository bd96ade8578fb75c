// 🗂️ Filing Consolidator - CLI
//
// ingest → run → resolve / review / export / history, all against one
// SQLite database so every invocation resumes from persisted state.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use filing_consolidator::{
    load_decisions, AliasQuery, Consolidator, ConsolidatorConfig, EntityKind, MasterId, PeriodId, ReviewAction,
};

#[derive(Parser)]
#[command(name = "filing-consolidator", version, about = "Insider filing entity resolution across periods")]
struct Cli {
    /// TOML config file (falls back to CONSOLIDATOR_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides storage.db_path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Adapt one period's extract directory and store it
    Ingest {
        dir: PathBuf,

        /// Period id (2006Q1, LEGACY); defaults to the directory name
        #[arg(long)]
        period: Option<String>,

        /// Declared layout tag (legacy-consolidated, form345-flat, form345-relational)
        #[arg(long)]
        shape: Option<String>,
    },

    /// Match, resolve and link new or revised records
    Run {
        /// Re-match every stored record
        #[arg(long)]
        full: bool,
    },

    /// Look up the master behind an alias on a business date
    #[command(group(ArgGroup::new("alias").required(true).args(["name", "ticker", "cik"])))]
    Resolve {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        ticker: Option<String>,

        #[arg(long)]
        cik: Option<String>,

        /// Restrict --cik to one period's local identifier
        #[arg(long, requires = "cik")]
        period: Option<String>,

        /// company or insider
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        as_of: NaiveDate,
    },

    /// Manual review queue
    Review {
        #[command(subcommand)]
        action: ReviewCommand,
    },

    /// Write the consolidated transaction history as CSV
    Export { csv: PathBuf },

    /// Every version and audit event of a master
    History { master_id: String },

    /// Rows held back by the adapters or the linker, with their reasons
    Quarantine {
        #[arg(long)]
        period: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// Open items, oldest first
    List,

    /// Apply a JSON file with one decision or an array of decisions
    Apply { file: PathBuf },

    /// Decisions received so far and how each was logged
    History,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("filing_consolidator=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let db_path = config.storage.db_path.clone();
    let mut consolidator =
        Consolidator::open(config).with_context(|| format!("opening database {}", db_path.display()))?;

    match cli.command {
        Command::Ingest { dir, period, shape } => run_ingest(&mut consolidator, dir, period, shape),
        Command::Run { full } => run_pipeline(&mut consolidator, full),
        Command::Resolve { name, ticker, cik, period, kind, as_of } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            let query = match (name, ticker, cik) {
                (Some(name), _, _) => AliasQuery::Name { kind, name },
                (_, Some(ticker), _) => AliasQuery::Ticker { ticker },
                (_, _, Some(local_id)) => AliasQuery::LocalId {
                    kind,
                    local_id,
                    period: period.as_deref().map(parse_period).transpose()?,
                },
                _ => bail!("one of --name, --ticker or --cik is required"),
            };
            run_resolve(&consolidator, &query, as_of)
        }
        Command::Review { action: ReviewCommand::List } => run_review_list(&consolidator),
        Command::Review { action: ReviewCommand::Apply { file } } => run_review_apply(&mut consolidator, file),
        Command::Review { action: ReviewCommand::History } => run_review_history(&consolidator),
        Command::Export { csv } => run_export(&consolidator, csv),
        Command::History { master_id } => run_history(&consolidator, &master_id),
        Command::Quarantine { period } => {
            let period = period.as_deref().map(parse_period).transpose()?;
            run_quarantine(&consolidator, period)
        }
    }
}

fn load_config(cli: &Cli) -> Result<ConsolidatorConfig> {
    let mut config = match &cli.config {
        Some(path) => ConsolidatorConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => ConsolidatorConfig::from_env().context("loading config from environment")?,
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    Ok(config)
}

fn parse_period(text: &str) -> Result<PeriodId> {
    text.parse::<PeriodId>().with_context(|| format!("invalid period {:?}", text))
}

fn parse_kind(text: &str) -> Result<EntityKind> {
    match text.to_lowercase().as_str() {
        "company" | "issuer" => Ok(EntityKind::Company),
        "insider" | "owner" => Ok(EntityKind::Insider),
        other => bail!("unknown kind {:?} (company or insider)", other),
    }
}

fn run_ingest(consolidator: &mut Consolidator, dir: PathBuf, period: Option<String>, shape: Option<String>) -> Result<()> {
    let period = match period {
        Some(p) => parse_period(&p)?,
        None => {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("cannot derive a period from {}", dir.display()))?;
            parse_period(name)?
        }
    };

    println!("📂 Ingesting {} from {}", period, dir.display());
    let outcome = consolidator
        .ingest_dir(&dir, period, shape.as_deref())
        .with_context(|| format!("ingesting {}", period))?;
    println!("✓ {}", outcome.summary());
    Ok(())
}

fn run_pipeline(consolidator: &mut Consolidator, full: bool) -> Result<()> {
    println!("🔄 Consolidating{}", if full { " (full re-match)" } else { "" });
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let summary = if full { consolidator.run_full()? } else { consolidator.run()? };
    println!("{}", summary);
    Ok(())
}

fn run_resolve(consolidator: &Consolidator, query: &AliasQuery, as_of: NaiveDate) -> Result<()> {
    match consolidator.resolve(query, as_of)? {
        Some(hit) => {
            println!("✓ {} → {}", query, hit.master_id);
            println!("   Kind:      {}", hit.kind.as_str());
            println!("   Canonical: {}", hit.canonical_name);
            if let Some(ticker) = &hit.canonical_ticker {
                println!("   Ticker:    {}", ticker);
            }
            if let Some(alias) = &hit.matched_alias {
                println!(
                    "   Matched:   {} ({}..{})",
                    alias.name, alias.first_period, alias.last_period
                );
            }
        }
        None => println!("❌ No master known as {} on {}", query, as_of),
    }
    Ok(())
}

fn run_review_list(consolidator: &Consolidator) -> Result<()> {
    let now = Utc::now();
    let items = consolidator.review_items();
    let stale = consolidator.stale_reviews(now).len();
    println!("🧑‍⚖️ Review queue: {} open, {} stale", items.len(), stale);
    for item in items {
        let c = &item.candidate;
        println!(
            "   {}  {:<20} {:.2}  {} ↔ {}  ({} days)",
            c.id,
            item.reason.reason_code(),
            c.score,
            c.left,
            c.right,
            item.age(now).num_days()
        );
    }
    Ok(())
}

fn run_review_apply(consolidator: &mut Consolidator, file: PathBuf) -> Result<()> {
    let decisions = load_decisions(&file).with_context(|| format!("reading decisions {}", file.display()))?;
    println!("🧑‍⚖️ Applying {} review decisions", decisions.len());

    let mut failed = 0;
    for decision in &decisions {
        match consolidator.apply_review(decision) {
            Ok(outcome) => println!("✓ {} ({} commits)", outcome.action, outcome.commits.len()),
            Err(e) if e.is_conflict() => {
                failed += 1;
                println!("⚠️  {}: {} (use override_conflict to merge)", decision.action.as_str(), e);
            }
            Err(e) => {
                failed += 1;
                println!("❌ {}: {}", decision.action.as_str(), e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} decisions not applied", failed, decisions.len());
    }
    Ok(())
}

fn run_review_history(consolidator: &Consolidator) -> Result<()> {
    let decisions = consolidator.review_decisions()?;
    println!("🧑‍⚖️ {} review decisions", decisions.len());
    for (decision, outcome) in &decisions {
        let target = match (&decision.candidate_id, &decision.action) {
            (Some(id), _) => id.to_string(),
            (None, ReviewAction::Split { records }) => records.join(", "),
            (None, _) => "-".to_string(),
        };
        println!(
            "   {:<17} {:<10} {}  by {}",
            decision.action.as_str(),
            outcome,
            target,
            decision.operator
        );
    }
    Ok(())
}

fn run_export(consolidator: &Consolidator, csv: PathBuf) -> Result<()> {
    let view = consolidator.view();
    let written = view
        .write_csv(&csv)
        .with_context(|| format!("writing {}", csv.display()))?;
    println!("💾 Exported {} transactions to {}", written, csv.display());
    Ok(())
}

fn run_history(consolidator: &Consolidator, master_id: &str) -> Result<()> {
    let history = consolidator.history(&MasterId::from_raw(master_id))?;
    let current = &history.current;
    println!("📜 {} {} (v{})", current.id, current.canonical_name, current.version);
    for alias in &current.aliases {
        println!(
            "   alias {:<30} {:<8} {}..{}",
            alias.name,
            alias.ticker.as_deref().unwrap_or("-"),
            alias.first_period,
            alias.last_period
        );
    }
    for entry in &current.provenance {
        let actors: Vec<&str> = entry.evidence.iter().map(|e| e.actor.as_str()).collect();
        println!(
            "   v{:<3} {:<9} +{} -{}  by {}",
            entry.version,
            entry.kind.as_str(),
            entry.added.len(),
            entry.removed.len(),
            actors.join(", ")
        );
    }
    println!("   {} stored versions, {} audit events", history.versions.len(), history.events.len());
    Ok(())
}

fn run_quarantine(consolidator: &Consolidator, period: Option<PeriodId>) -> Result<()> {
    let items: Vec<_> = consolidator
        .quarantine()?
        .into_iter()
        .filter(|item| period.map_or(true, |p| item.period == p))
        .collect();
    println!("🚧 {} quarantined rows", items.len());
    for item in &items {
        println!(
            "   {:<8} {:<7} {:<22} {}  {}",
            item.stage.as_str(),
            item.period,
            item.reason_code(),
            item.source,
            item.error
        );
    }
    Ok(())
}
