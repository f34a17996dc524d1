//! Delver CLI - Command-line interface for deep research
//!
//! Runs iterative research sessions from the terminal and manages stored
//! reports and configuration.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use delver_core::{
    init_logging, DelverConfig, DelverError, DelverResult, ErrorContext, LoggingConfig,
};
use delver_engine::{
    compute_cost, AcademicSearchAdapter, AutoApprove, CreditController, CreditLedger,
    FileReportStore, InMemoryCreditLedger, ProgressCallback, QueryPlanner, QuestionHandler,
    ReportRecord, ReportStore, ReportSynthesizer, ResearchOrchestrator, ResearchParams,
    ResultProcessor, SessionStatus, WebSearchAdapter,
};
use delver_llm::{LanguageModel, SiumaiModel};
use delver_search::{ApiClientConfig, HttpScholarSearch, HttpWebSearch};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Parser)]
#[command(name = "delver")]
#[command(about = "Iterative deep research with cited reports")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a research session and synthesize a cited report
    Research {
        /// Research topic
        topic: String,

        /// Number of sequential research rounds
        #[arg(short, long)]
        depth: Option<u32>,

        /// Number of parallel sub-queries per round
        #[arg(short, long)]
        breadth: Option<u32>,

        /// Report language
        #[arg(short, long)]
        language: Option<String>,

        /// Confirm each sub-query before it runs
        #[arg(short, long)]
        interactive: bool,

        /// Write the report to this file as well as the report store
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Starting credit balance for this session
        #[arg(long, default_value = "100")]
        credits: i64,
    },

    /// Show a stored report or list all stored reports
    Report {
        /// Session ID of the report to print
        session: Option<String>,

        /// List stored reports instead
        #[arg(long)]
        list: bool,
    },

    /// Show the credit cost of a session before running it
    Cost {
        #[arg(short, long)]
        depth: Option<u32>,

        #[arg(short, long)]
        breadth: Option<u32>,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Asks the sub-query confirmation on stdin. Enter or "y" approves.
struct StdinQuestionHandler;

#[async_trait]
impl QuestionHandler for StdinQuestionHandler {
    async fn ask(&self, question: &str) -> DelverResult<bool> {
        println!("{} [Y/n]", question);
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| DelverError::Internal {
            message: format!("stdin reader task failed: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("ask_question"),
        })??;
        Ok(!line.trim().eq_ignore_ascii_case("n"))
    }
}

#[tokio::main]
async fn main() -> DelverResult<()> {
    let cli = Cli::parse();

    let mut logging_config = LoggingConfig::default();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }

    init_logging(&logging_config).map_err(|e| DelverError::Config {
        message: format!("Failed to initialize logging: {}", e),
        source: Some(e),
        context: ErrorContext::new("cli")
            .with_operation("init_logging")
            .with_suggestion("Check logging configuration"),
    })?;

    info!("Starting Delver CLI v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_ref())?;
    config.validate()?;

    match cli.command {
        Commands::Research {
            topic,
            depth,
            breadth,
            language,
            interactive,
            output,
            credits,
        } => {
            handle_research(
                topic, depth, breadth, language, interactive, output, credits, &config,
            )
            .await?;
        }
        Commands::Report { session, list } => {
            handle_report(session, list).await?;
        }
        Commands::Cost { depth, breadth } => {
            let depth = depth.unwrap_or(config.research.default_depth);
            let breadth = breadth.unwrap_or(config.research.default_breadth);
            let cost = compute_cost(&config.pricing, depth, breadth);
            println!(
                "Research at depth {} and breadth {} costs {} credits",
                depth, breadth, cost
            );
        }
        Commands::Config { show, init } => {
            handle_config(show, init, &config)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> DelverResult<DelverConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let mut config = DelverConfig::from_file(path)?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => DelverConfig::load(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_research(
    topic: String,
    depth: Option<u32>,
    breadth: Option<u32>,
    language: Option<String>,
    interactive: bool,
    output: Option<PathBuf>,
    credits: i64,
    config: &DelverConfig,
) -> DelverResult<()> {
    let depth = depth.unwrap_or(config.research.default_depth);
    let breadth = breadth.unwrap_or(config.research.default_breadth);
    let language = language.unwrap_or_else(|| config.research.language.clone());
    let user_id = "local".to_string();

    let model: Arc<dyn LanguageModel> = Arc::new(SiumaiModel::new(config.llm.clone()).await?);

    let web_provider = HttpWebSearch::new(
        ApiClientConfig::new(&config.search.web_base_url, config.search.web_api_key.clone())
            .with_timeout(config.search.timeout_seconds),
    )?;
    let scholar_provider = HttpScholarSearch::new(
        ApiClientConfig::new(
            &config.search.scholar_base_url,
            config.search.scholar_api_key.clone(),
        )
        .with_timeout(config.search.timeout_seconds),
    )?;

    let ledger = Arc::new(InMemoryCreditLedger::with_balance(&user_id, credits));
    let controller = CreditController::new(
        Arc::clone(&ledger) as Arc<dyn CreditLedger>,
        Arc::new(RwLock::new(config.pricing.clone())),
    );

    let question_handler: Arc<dyn QuestionHandler> = if interactive {
        Arc::new(StdinQuestionHandler)
    } else {
        Arc::new(AutoApprove)
    };

    let orchestrator = ResearchOrchestrator::new(
        QueryPlanner::new(Arc::clone(&model)),
        ResultProcessor::new(
            Arc::clone(&model),
            config.research.max_learnings_per_query,
            config.research.max_follow_up_questions,
        ),
        WebSearchAdapter::new(
            Arc::new(web_provider),
            config.search.max_results,
            config.research.content_char_limit,
        ),
        AcademicSearchAdapter::new(
            Arc::new(scholar_provider),
            Arc::clone(&model),
            config.search.max_results,
            config.research.content_char_limit,
        ),
        controller,
        question_handler,
        config.research.clone(),
    );

    let on_progress: ProgressCallback = Arc::new(|progress| {
        if progress.is_generating_report {
            eprint!("\rresearch complete, synthesizing report...  ");
        } else {
            eprint!(
                "\rdepth {}/{}  queries {}/{}  ",
                progress.current_depth,
                progress.total_depth,
                progress.completed_queries,
                progress.total_queries
            );
        }
        let _ = std::io::stderr().flush();
    });

    let params = ResearchParams {
        query: topic.clone(),
        depth,
        breadth,
        user_id: user_id.clone(),
        language: language.clone(),
        interactive,
    };

    println!(
        "Researching \"{}\" (depth {}, breadth {}, {} credits available)",
        topic, depth, breadth, credits
    );

    let outcome = orchestrator.run_research(params, on_progress).await?;
    eprintln!();
    println!(
        "Research done: {} learnings from {} sources, {} credits used. Writing report...",
        outcome.learnings.len(),
        outcome.visited_urls.len(),
        outcome.credits_used
    );

    let synthesizer = ReportSynthesizer::new(model);
    let report = synthesizer
        .synthesize(
            &topic,
            &outcome.learnings,
            &outcome.visited_urls,
            &outcome.reference_mapping,
            &outcome.citations,
            &language,
        )
        .await?;

    let store = FileReportStore::new(reports_dir()?)?;
    store
        .save_report(
            &ReportRecord {
                session_id: outcome.session_id.clone(),
                query: topic,
                language,
                status: SessionStatus::Completed,
                learnings_count: outcome.learnings.len(),
                references_count: report.references_total,
                credits_used: outcome.credits_used,
                created_at: chrono::Utc::now(),
            },
            &report.markdown,
        )
        .await?;

    if let Some(path) = output {
        tokio::fs::write(&path, &report.markdown).await?;
        println!("Report written to {:?}", path);
    } else {
        println!("\n{}", report.markdown);
    }

    println!(
        "\nSession {} saved ({} references, {} cited in body). Remaining balance: {}",
        outcome.session_id,
        report.references_total,
        report.cited_in_body,
        ledger.get_balance(&user_id).await?
    );

    Ok(())
}

async fn handle_report(session: Option<String>, list: bool) -> DelverResult<()> {
    let store = FileReportStore::new(reports_dir()?)?;

    if list || session.is_none() {
        let records = store.list_reports().await?;
        if records.is_empty() {
            println!("No stored reports");
            return Ok(());
        }
        for record in records {
            println!(
                "{}  {}  depth-credits {}  \"{}\"",
                record.session_id,
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.credits_used,
                record.query
            );
        }
        return Ok(());
    }

    let session = session.unwrap_or_default();
    match store.load_report(&session).await? {
        Some(markdown) => println!("{}", markdown),
        None => {
            return Err(DelverError::NotFound {
                resource: format!("report {}", session),
                context: ErrorContext::new("cli")
                    .with_operation("load_report")
                    .with_suggestion("Run 'delver report --list' to see stored sessions"),
            })
        }
    }

    Ok(())
}

fn handle_config(show: bool, init: bool, config: &DelverConfig) -> DelverResult<()> {
    if init {
        let path = DelverConfig::default_path().ok_or_else(|| DelverError::Config {
            message: "Cannot determine home directory".to_string(),
            source: None,
            context: ErrorContext::new("cli").with_operation("config_init"),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        DelverConfig::default().save_to_file(&path)?;
        println!("Wrote default configuration to {:?}", path);
    }

    if show || !init {
        println!(
            "Research: depth {}, breadth {}, concurrency {}, language {}",
            config.research.default_depth,
            config.research.default_breadth,
            config.research.concurrency,
            config.research.language
        );
        println!(
            "Pricing: base {}, per-depth {}, per-breadth {}",
            config.pricing.base_credits,
            config.pricing.depth_multiplier,
            config.pricing.breadth_multiplier
        );
        println!("LLM: {} ({})", config.llm.provider, config.llm.model);
        println!(
            "Search: web {} / scholar {}",
            config.search.web_base_url, config.search.scholar_base_url
        );
    }

    Ok(())
}

fn reports_dir() -> DelverResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".delver").join("reports"))
        .ok_or_else(|| DelverError::Config {
            message: "Cannot determine home directory".to_string(),
            source: None,
            context: ErrorContext::new("cli").with_operation("reports_dir"),
        })
}
