//! `canon` command line: audit, cleanup, sync, and one-shot chat against
//! the remote platform, with the dependency graph built explicitly here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use canon_config::ConfigStore;
use canon_orchestrator::{QueryClassifier, RequestOrchestrator};
use canon_platform::{HttpPlatformClient, PlatformClient, PlatformClientConfig};
use canon_reconcile::{Auditor, FileSynchronizer, Reconciler, ReconcilerSettings};
use canon_resilience::{FallbackChain, ResponseCache};
use canon_store::{MemoryDocumentStore, MemorySessionStore, SqliteDocumentStore};

#[derive(Parser)]
#[command(name = "canon", about = "Remote resource reconciliation for the chat backend")]
struct Cli {
    #[arg(
        long,
        env = "CANON_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL of the remote assistant platform"
    )]
    api_base: String,

    #[arg(long, env = "CANON_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(
        long,
        env = "CANON_CONFIG_PATH",
        default_value = "canonical-config.json",
        help = "Path of the canonical resource config file"
    )]
    config_path: PathBuf,

    #[arg(
        long,
        env = "CANON_DOCUMENT_DB",
        help = "SQLite document registry; omitted means an in-memory registry"
    )]
    document_db: Option<PathBuf>,

    #[arg(
        long,
        env = "CANON_ASSISTANT_NAME",
        default_value = "canon-assistant",
        help = "Name used when the canonical assistant has to be created"
    )]
    assistant_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all remote resources and report drift.
    Audit,
    /// Delete duplicate remote resources, keeping one canonical pair.
    Cleanup {
        #[arg(long, help = "Report what would be deleted without deleting")]
        dry_run: bool,
    },
    /// Upload and attach registry documents missing from the vector store.
    Sync,
    /// Send one message through the full request pipeline.
    Chat {
        #[arg(long)]
        message: String,
        #[arg(long, help = "Existing session id; omitted mints a new one")]
        session: Option<String>,
    },
}

struct Deps {
    platform: Arc<dyn PlatformClient>,
    config: ConfigStore,
    settings: ReconcilerSettings,
}

impl Deps {
    fn build(cli: &Cli) -> Result<Self> {
        let client = HttpPlatformClient::new(PlatformClientConfig::new(
            cli.api_base.clone(),
            cli.api_key.clone(),
        ))
        .context("failed to create platform client")?;
        let settings = ReconcilerSettings {
            assistant_name: cli.assistant_name.clone(),
            ..ReconcilerSettings::default()
        };
        Ok(Self {
            platform: Arc::new(client),
            config: ConfigStore::new(cli.config_path.clone()),
            settings,
        })
    }

    fn document_store(&self, cli: &Cli) -> Result<Arc<dyn canon_store::DocumentStore>> {
        match &cli.document_db {
            Some(path) => {
                let store = SqliteDocumentStore::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(MemoryDocumentStore::new())),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let deps = Deps::build(&cli)?;

    match &cli.command {
        Command::Audit => {
            let auditor = Auditor::new(deps.platform.clone(), deps.config.clone());
            let report = auditor.audit().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cleanup { dry_run } => {
            let auditor = Auditor::new(deps.platform.clone(), deps.config.clone());
            let report = auditor.audit().await?;
            let log = auditor.cleanup(&report, *dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&log)?);
            if !dry_run {
                let verdict = auditor.verify().await?;
                println!("{}", serde_json::to_string_pretty(&verdict)?);
                if !verdict.consistent {
                    bail!("post-cleanup verification failed: {:?}", verdict.issues);
                }
            }
        }
        Command::Sync => {
            let reconciler = Reconciler::new(
                deps.platform.clone(),
                deps.config.clone(),
                deps.settings.clone(),
            );
            let ids = reconciler.ensure_canonical_resources().await?;
            let synchronizer =
                FileSynchronizer::new(deps.platform.clone(), deps.document_store(&cli)?);
            let report = synchronizer.sync_files(&ids.vector_store_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Chat { message, session } => {
            let reconciler = Arc::new(Reconciler::new(
                deps.platform.clone(),
                deps.config.clone(),
                deps.settings.clone(),
            ));
            let orchestrator = RequestOrchestrator::new(
                deps.platform.clone(),
                reconciler,
                deps.document_store(&cli)?,
                Arc::new(MemorySessionStore::new()),
                QueryClassifier::new()?,
                FallbackChain::standard(Arc::new(ResponseCache::with_default_ttl())),
            );
            let outcome = orchestrator
                .handle_request(message, session.as_deref(), None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
