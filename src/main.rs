use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use career_inbox::config::AppConfig;
use career_inbox::logging::init_logging;
use career_inbox::metrics::MetricsCollector;
use career_inbox::models::{NewCompany, NewEmailAccount, NewPattern, PatternType};
use career_inbox::validation::InputValidator;
use career_inbox::{
    AllocationService, BulkClassifier, CommandRunner, CompanyService, Database, InboundEmail, MailboxService,
    OperationResult,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults to config/default, config/local and career-inbox.*
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tracked companies
    Company {
        #[command(subcommand)]
        action: CompanyCommand,
    },
    /// Manage mail accounts
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
    /// Manage company matching rules
    Pattern {
        #[command(subcommand)]
        action: PatternCommand,
    },
    /// Store messages from a JSON file and allocate the new ones
    Ingest {
        /// Mail account the messages belong to
        #[arg(short, long)]
        account: i64,

        /// JSON array of messages
        file: PathBuf,
    },
    /// Run the rule matcher for one message
    Allocate {
        message: i64,
    },
    /// Assign a message to a company by hand
    Assign {
        message: i64,
        company: i64,
    },
    /// Detach a message from its company
    Unassign {
        message: i64,
    },
    /// Re-run the rule matcher over every message of an account
    Reallocate {
        account: i64,
    },
    /// Classify every unprocessed message of a user
    Classify {
        user: i64,
    },
    /// Show the events and deadlines found in one message without storing them
    Extract {
        message: i64,
    },
}

#[derive(Subcommand)]
enum CompanyCommand {
    /// Create a company with its default keyword rules
    Add {
        name: String,

        /// Owning user
        #[arg(short, long, default_value_t = 1)]
        user: i64,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        url: Option<String>,
    },
    /// List a user's companies
    List {
        #[arg(short, long, default_value_t = 1)]
        user: i64,

        /// Only companies whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Delete a company and its rules
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Register a mail account
    Add {
        email: String,

        #[arg(short, long, default_value_t = 1)]
        user: i64,

        #[arg(short, long)]
        provider: Option<String>,
    },
    /// List a user's mail accounts
    List {
        #[arg(short, long, default_value_t = 1)]
        user: i64,
    },
}

#[derive(Subcommand)]
enum PatternCommand {
    /// Add a rule to a company
    Add {
        company: i64,

        /// address, domain, subject_keyword or body_keyword
        pattern_type: PatternType,

        value: String,

        #[arg(short, long)]
        priority: Option<i64>,
    },
    /// List a company's rules, highest priority first
    List {
        company: i64,
    },
    /// Delete a rule
    Remove {
        id: i64,
    },
    /// Enable a rule
    Enable {
        id: i64,
    },
    /// Disable a rule
    Disable {
        id: i64,
    },
}

/// Services wired against one database
struct App {
    config: AppConfig,
    db: Database,
    metrics: MetricsCollector,
    companies: CompanyService,
    allocation: AllocationService,
    mailbox: MailboxService,
}

impl App {
    fn new(config: AppConfig) -> Result<Self> {
        InputValidator::validate_database_url(&config.database.url)?;
        let db = Database::from_config(&config.database).context("Failed to open database")?;

        let metrics = MetricsCollector::default();
        metrics.describe();

        let allocation = AllocationService::with_metrics(db.clone(), metrics.clone());
        Ok(Self {
            companies: CompanyService::new(db.clone()),
            mailbox: MailboxService::new(db.clone(), allocation.clone()),
            allocation,
            metrics,
            db,
            config,
        })
    }

    fn classifier(&self) -> BulkClassifier {
        let runner = CommandRunner::from_config(&self.config.classifier);
        BulkClassifier::new(self.db.clone(), Arc::new(runner))
            .with_metrics(self.metrics.clone())
            .with_config(self.config.classifier.clone(), self.config.schedule.clone())
    }
}

fn to_json<T: Serialize>(value: T) -> career_inbox::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn read_inbound(path: &Path) -> career_inbox::Result<Vec<InboundEmail>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn execute(app: &App, command: Commands) -> career_inbox::Result<Value> {
    match command {
        Commands::Company { action } => match action {
            CompanyCommand::Add {
                name,
                user,
                industry,
                url,
            } => to_json(app.companies.create(NewCompany {
                industry,
                url,
                ..NewCompany::named(user, name)
            })?),
            CompanyCommand::List { user, search: None } => to_json(app.companies.list(user)?),
            CompanyCommand::List {
                user,
                search: Some(query),
            } => to_json(app.companies.search(user, &query)?),
            CompanyCommand::Delete { id } => to_json(app.companies.delete(id)?),
        },
        Commands::Account { action } => match action {
            AccountCommand::Add { email, user, provider } => to_json(app.mailbox.add_account(NewEmailAccount {
                user_id: user,
                email_address: email,
                provider,
            })?),
            AccountCommand::List { user } => to_json(app.mailbox.list_accounts(user)?),
        },
        Commands::Pattern { action } => match action {
            PatternCommand::Add {
                company,
                pattern_type,
                value,
                priority,
            } => {
                let new_pattern = NewPattern {
                    priority,
                    ..NewPattern::new(pattern_type, value)
                };
                to_json(app.allocation.add_pattern(company, new_pattern)?)
            }
            PatternCommand::List { company } => to_json(app.allocation.get_patterns(company)?),
            PatternCommand::Remove { id } => to_json(app.allocation.remove_pattern(id)?),
            PatternCommand::Enable { id } => to_json(app.allocation.set_pattern_enabled(id, true)?),
            PatternCommand::Disable { id } => to_json(app.allocation.set_pattern_enabled(id, false)?),
        },
        Commands::Ingest { account, file } => {
            let batch = read_inbound(&file)?;
            info!(account, count = batch.len(), file = %file.display(), "Ingesting messages");
            to_json(app.mailbox.ingest_batch(account, batch)?)
        }
        Commands::Allocate { message } => to_json(app.allocation.allocate(message)?),
        Commands::Assign { message, company } => to_json(app.allocation.manually_allocate(message, company)?),
        Commands::Unassign { message } => to_json(app.allocation.unallocate(message)?),
        Commands::Reallocate { account } => to_json(app.allocation.reallocate_all_emails(account)?),
        Commands::Classify { user } => to_json(app.classifier().process_unprocessed(user).await?),
        Commands::Extract { message } => to_json(app.classifier().extract_schedule(message).await?),
    }
}

#[allow(clippy::print_stdout)]
fn print_result(result: &OperationResult<Value>) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(result).context("Failed to render result")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load().context("Failed to load configuration")?,
    };

    // Initialize logging; the guard flushes the log file on exit
    let _guard = init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("Starting career-inbox");

    let app = App::new(config)?;
    let result = OperationResult::from(execute(&app, cli.command).await);
    print_result(&result)?;

    debug!(snapshot = ?app.metrics.snapshot(), "Metrics at exit");
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
