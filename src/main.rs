use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epic_triage::api::{self, ApiAuth, AppState};
use epic_triage::config::Settings;
use epic_triage::coordinator::{CoordinatorOptions, RunCoordinator};
use epic_triage::db::Database;
use epic_triage::engine::EpicMergeEngine;
use epic_triage::intake::{OutboxReplier, SpoolMailbox};
use epic_triage::models::{ProjectSlug, RunStatus};
use epic_triage::store::{ObjectStore, ProjectStore, SqliteObjectStore};
use epic_triage::synthesis;

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Fold requirement emails into living per-project epics")]
struct Cli {
    /// Database path (overrides TRIAGE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log to stderr instead of stdout
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process unseen requirement messages once (default)
    Run {
        /// Spool directory (overrides TRIAGE_INBOX_DIR)
        #[arg(long)]
        inbox: Option<PathBuf>,
    },
    /// Start the inspection API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Print the current epic for a project
    Show {
        /// Project title or slug
        project: String,
    },
}

fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "epic_triage=info,tower_http=info".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_store(settings: &Settings) -> anyhow::Result<SqliteObjectStore> {
    let db = Database::open(settings.db_path.clone())
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db.migrate()?;
    Ok(SqliteObjectStore::new(db))
}

/// Flip the watch channel on Ctrl-C or SIGTERM.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::warn!("Shutdown requested, finishing in-flight merges");
        let _ = tx.send(true);
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_stderr);

    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    match cli.command.unwrap_or(Commands::Run { inbox: None }) {
        Commands::Run { inbox } => {
            if let Some(inbox) = inbox {
                settings.inbox_dir = inbox;
            }
            let store = open_store(&settings)?;
            let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());

            let engine = EpicMergeEngine::new(
                shared.clone(),
                synthesis::from_settings(&settings)?,
                settings.store_options(),
            );
            let mut coordinator = RunCoordinator::new(
                engine,
                Arc::new(SpoolMailbox::new(settings.inbox_dir.clone())),
                store.database().clone(),
                shared,
                CoordinatorOptions::from_settings(&settings),
            )?;
            if let Some(outbox) = &settings.outbox_dir {
                tracing::info!(outbox = %outbox.display(), "Replies enabled");
                coordinator = coordinator.with_replier(Arc::new(OutboxReplier::new(outbox.clone())));
            }

            let report = coordinator.run(shutdown_signal()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.status == RunStatus::Aborted {
                anyhow::bail!(report.error.unwrap_or_else(|| "run aborted".to_string()));
            }
        }
        Commands::Serve { port } => {
            tracing::info!("Starting inspection API on port {}", port);

            let store = open_store(&settings)?;
            let auth = ApiAuth {
                api_key: settings.api_key.clone(),
            };
            let app = api::create_router(AppState::new(store, settings.store_options()), auth);

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("Inspection API listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app).await?;
        }
        Commands::Show { project } => {
            let slug = ProjectSlug::from_title(&project)?;
            let store = open_store(&settings)?;
            let project = ProjectStore::new(Arc::new(store), slug.clone(), &settings.store_options());

            match project.get_epic().await? {
                Some(epic) => print!("{}", epic.content),
                None => anyhow::bail!("No epic for project {}", slug),
            }
        }
    }

    Ok(())
}
