//! linkql CLI - plan joins over a knowledge graph and reconcile tables
//!
//! Usage:
//!   linkql resolve --graph <graph.json> <term>
//!   linkql path --graph <graph.json> <from> <to>
//!   linkql plan --graph <graph.json> <intent.json> [--dialect <dialect>]
//!   linkql ask --graph <graph.json> "<question>" [--dialect <dialect>]
//!   linkql reconcile <rules.json> [--dialect <dialect>] [--sqlite <db> | --connection <name>]
//!   linkql run --graph <graph.json> "<question>" [--sqlite <db> | --connection <name>]
//!
//! Examples:
//!   linkql ask --graph gpu.json "RBP GPU not in OPS EXCEL GPU" --dialect tsql
//!   linkql reconcile rules.json --sqlite ./local.db

use clap::{Args, Parser, Subcommand, ValueEnum};
use linkql::config::{Driver, Settings};
use linkql::executor::{Connection, QueryExecutor, SqliteConnection};
use linkql::graph::{JsonGraphProvider, KnowledgeGraph};
use linkql::intent::{PartialIntent, RuleBasedParser};
use linkql::planner::Planner;
use linkql::reconcile::{KpiReport, ReconciliationRule, RuleEngine};
use linkql::sql::Dialect;
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "linkql")]
#[command(about = "linkql - knowledge-graph join planning and reconciliation over multi-dialect SQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $LINKQL_CONFIG, ./linkql.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a business term to a table
    Resolve {
        #[arg(short, long)]
        graph: PathBuf,
        term: String,
    },

    /// Show the best join path between two tables
    Path {
        #[arg(short, long)]
        graph: PathBuf,
        from: String,
        to: String,
    },

    /// Generate SQL for an intent given as JSON
    Plan {
        #[arg(short, long)]
        graph: PathBuf,
        /// Path to the intent JSON file
        intent: PathBuf,
        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
    },

    /// Generate SQL for a question
    Ask {
        #[arg(short, long)]
        graph: PathBuf,
        question: String,
        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
    },

    /// Print reconciliation SQL, or run it when a database is given
    Reconcile {
        /// Path to a rule or a list of rules (JSON)
        rules: PathBuf,
        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
        #[command(flatten)]
        target: DatabaseArgs,
        /// Sample rows per record set
        #[arg(long, default_value_t = 10)]
        samples: u64,
    },

    /// Answer a question against a database
    Run {
        #[arg(short, long)]
        graph: PathBuf,
        question: String,
        #[command(flatten)]
        target: DatabaseArgs,
    },
}

#[derive(Args)]
struct DatabaseArgs {
    /// SQLite database file
    #[arg(long, conflicts_with = "connection")]
    sqlite: Option<PathBuf>,

    /// Named connection from the settings file
    #[arg(long)]
    connection: Option<String>,
}

impl DatabaseArgs {
    fn is_set(&self) -> bool {
        self.sqlite.is_some() || self.connection.is_some()
    }
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Oracle,
    Sqlite,
    Duckdb,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Oracle => Dialect::Oracle,
            DialectArg::Sqlite => Dialect::Sqlite,
            DialectArg::Duckdb => Dialect::DuckDb,
        }
    }
}

/// One rule or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Many(Vec<ReconciliationRule>),
    One(Box<ReconciliationRule>),
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LINKQL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Resolve { graph, term } => cmd_resolve(&settings, &graph, &term).await,
        Commands::Path { graph, from, to } => cmd_path(&settings, &graph, &from, &to).await,
        Commands::Plan {
            graph,
            intent,
            dialect,
        } => cmd_plan(&settings, &graph, &intent, dialect.into()).await,
        Commands::Ask {
            graph,
            question,
            dialect,
        } => cmd_ask(&settings, &graph, &question, dialect.into()).await,
        Commands::Reconcile {
            rules,
            dialect,
            target,
            samples,
        } => cmd_reconcile(&settings, &rules, dialect.into(), &target, samples).await,
        Commands::Run {
            graph,
            question,
            target,
        } => cmd_run(&settings, &graph, &question, &target).await,
    }
}

async fn load_planner(settings: &Settings, path: &Path) -> Result<Planner, Box<dyn Error>> {
    let doc = JsonGraphProvider::load_file(path).await?;
    let graph = KnowledgeGraph::from_document(doc)?;
    Ok(Planner::with_config(
        Arc::new(graph),
        settings.planner.clone(),
        settings.resolver.clone(),
    ))
}

fn open_database(
    settings: &Settings,
    args: &DatabaseArgs,
) -> Result<Arc<dyn Connection>, Box<dyn Error>> {
    if let Some(path) = &args.sqlite {
        return Ok(Arc::new(SqliteConnection::open(path)?));
    }
    let (name, conn) = match &args.connection {
        Some(name) => (name.as_str(), settings.get_connection(name)?),
        None => settings
            .default_connection()
            .ok_or("no database given: pass --sqlite or --connection")?,
    };
    match conn.driver_type()? {
        Driver::Sqlite => Ok(Arc::new(SqliteConnection::open(
            conn.resolved_connection_string()?,
        )?)),
        other => Err(format!(
            "connection '{}' uses driver '{}', which has no built-in client; \
             run `linkql reconcile` without a database to print its SQL",
            name, other
        )
        .into()),
    }
}

async fn cmd_resolve(settings: &Settings, graph: &Path, term: &str) -> CliResult {
    let planner = load_planner(settings, graph).await?;
    let resolution = planner.resolve_table(term)?;
    println!(
        "{} -> {} ({}, score {:.2})",
        resolution.term, resolution.table, resolution.method, resolution.score
    );
    Ok(())
}

async fn cmd_path(settings: &Settings, graph: &Path, from: &str, to: &str) -> CliResult {
    let planner = load_planner(settings, graph).await?;
    let path = planner.find_path(from, to)?;
    println!("{}", path);
    println!(
        "-- {} hop(s), confidence {:.2}, score {:.3}",
        path.hops(),
        path.confidence(),
        path.score(&planner.config().scoring())
    );
    Ok(())
}

async fn cmd_plan(settings: &Settings, graph: &Path, intent: &Path, dialect: Dialect) -> CliResult {
    let planner = load_planner(settings, graph).await?;
    let text = std::fs::read_to_string(intent)
        .map_err(|e| format!("Error reading file '{}': {}", intent.display(), e))?;
    let partial: PartialIntent = serde_json::from_str(&text)?;
    let planned = planner.plan(partial, dialect)?;
    println!("{}", planned.sql);
    Ok(())
}

async fn cmd_ask(settings: &Settings, graph: &Path, question: &str, dialect: Dialect) -> CliResult {
    let planner = load_planner(settings, graph).await?;
    let planned = planner
        .plan_text(&RuleBasedParser::new(), question, dialect)
        .await?;
    println!("-- {} {}", planned.intent.operation().name(), planned.intent.source_table());
    println!("-- confidence {:.2}", planned.intent.confidence());
    println!("{}", planned.sql);
    Ok(())
}

async fn cmd_reconcile(
    settings: &Settings,
    path: &Path,
    dialect: Dialect,
    target: &DatabaseArgs,
    samples: u64,
) -> CliResult {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    let rules = match serde_json::from_str::<RulesFile>(&text)? {
        RulesFile::Many(rules) => rules,
        RulesFile::One(rule) => vec![*rule],
    };

    if !target.is_set() {
        for rule in &rules {
            let queries = rule.plan()?.queries(dialect, Some(samples))?;
            println!("-- rule: {}", rule.name);
            for (label, query) in [
                ("matched", &queries.matched),
                ("unmatched source", &queries.unmatched_source),
                ("unmatched target", &queries.unmatched_target),
                ("source count", &queries.source_count),
                ("target count", &queries.target_count),
                ("matched count", &queries.matched_count),
            ] {
                println!("-- {}\n{};\n", label, query.to_sql(dialect));
            }
            if let Some(q) = &queries.inactive_count {
                println!("-- inactive count\n{};\n", q.to_sql(dialect));
            }
        }
        return Ok(());
    }

    let connection = open_database(settings, target)?;
    let executor = QueryExecutor::new(connection, settings.execution.clone());
    let engine = RuleEngine::new(executor).with_sample_limit(samples);

    let mut results = Vec::new();
    let mut failed = 0;
    for (rule, outcome) in rules.iter().zip(engine.execute_all(&rules).await) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                failed += 1;
                eprintln!("rule '{}' failed: {}", rule.name, e);
            }
        }
    }
    let report = KpiReport::from_results(&results, &settings.kpi);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "results": results,
            "kpi": report,
        }))?
    );
    if failed > 0 {
        return Err(format!("{} of {} rules failed", failed, rules.len()).into());
    }
    Ok(())
}

async fn cmd_run(
    settings: &Settings,
    graph: &Path,
    question: &str,
    target: &DatabaseArgs,
) -> CliResult {
    let planner = load_planner(settings, graph).await?;
    let connection = open_database(settings, target)?;
    let executor = QueryExecutor::new(connection, settings.execution.clone());

    let planned = planner
        .plan_text(&RuleBasedParser::new(), question, executor.dialect())
        .await?;
    let query = planner.build_query(&planned.intent)?;
    let rows = executor.execute(&query).await?;
    println!("{}", serde_json::to_string_pretty(&rows.records())?);
    if rows.truncated {
        eprintln!("-- output truncated at {} rows", settings.execution.max_rows);
    }
    Ok(())
}
