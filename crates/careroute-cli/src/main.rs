use anyhow::{Context, Result};
use careroute_core::{
    AgeBracket, CallerContext, ConversationRecorder, Dispatcher, HandlerId, HttpTransport,
    ProfileStore, Router, TriageRequest, TriageService,
};
use careroute_gateway::GatewayServer;
use careroute_store::{ConversationDb, StoredTurn};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::CarerouteConfig;

#[derive(Parser)]
#[command(name = "careroute")]
#[command(version)]
#[command(about = "careroute — triage user messages and dispatch them to care handlers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,

    /// Run the HTTP gateway and the retention purge loop
    Start,

    /// Print the routing decision for a message without dispatching it
    Route {
        message: String,
        #[command(flatten)]
        caller: CallerArgs,
    },

    /// Run the full pipeline for one message against the configured handlers
    Ask {
        message: String,
        #[command(flatten)]
        caller: CallerArgs,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Delete expired conversation turns now
    Purge,

    /// Show recorded turns for a conversation, or the latest turns overall
    History {
        conversation_id: Option<String>,
        /// How many recent turns to show when no conversation is given
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(clap::Args)]
struct CallerArgs {
    /// Force a handler (safety, illness_triage, emotional_support, general_wellness)
    #[arg(long)]
    handler: Option<String>,
    /// Caller age bracket (child, youth, adult, elderly)
    #[arg(long)]
    age: Option<AgeBracket>,
    /// Handler the caller has preferred before
    #[arg(long)]
    preferred: Option<HandlerId>,
    /// Handler that served the caller most recently
    #[arg(long)]
    recent: Option<HandlerId>,
}

impl CallerArgs {
    fn into_request(self, message: String) -> TriageRequest {
        TriageRequest {
            message,
            explicit_handler: self.handler,
            caller_context: CallerContext {
                age_bracket: self.age,
                previously_preferred_handler: self.preferred,
                most_recently_used_handler: self.recent,
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Route { message, caller } => cmd_route(&cli.config, caller.into_request(message)).await,
        Commands::Ask {
            message,
            caller,
            conversation,
        } => {
            let mut request = caller.into_request(message);
            request.conversation_id = conversation;
            cmd_ask(&cli.config, request).await
        }
        Commands::Purge => cmd_purge(&cli.config).await,
        Commands::History {
            conversation_id,
            limit,
        } => cmd_history(&cli.config, conversation_id.as_deref(), limit).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config::default_config_path();
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("careroute initialized at {}", config_dir.display());
    println!("Edit {} to point at your handler services.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CarerouteConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CarerouteConfig::load(config_path)?;
    info!("Starting careroute daemon...");

    let cancel = CancellationToken::new();

    let db = open_db(&cfg)?;
    let service = Arc::new(build_service(&cfg, Arc::new(db.clone()))?);

    let bind: SocketAddr = format!("{}:{}", cfg.server.bind, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cfg.server.bind, cfg.server.port))?;
    let gateway = GatewayServer::new(bind, cfg.server.auth_token.clone(), service.clone())
        .with_shutdown(cancel.clone())
        .spawn();

    let purge_loop = spawn_purge_loop(
        db,
        Duration::from_secs(cfg.storage.purge_interval_secs),
        cancel.clone(),
    );

    println!("careroute listening on http://{}", bind);

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down...");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    match gateway.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Gateway exited with error: {:#}", e),
        Err(e) => error!("Gateway task panicked: {}", e),
    }
    join_logged("Purge loop", purge_loop).await;

    // Let in-flight audit writes land before exit
    service.recorder().flush().await;

    println!("careroute stopped.");
    Ok(())
}

/// Periodically delete expired turns until cancelled
fn spawn_purge_loop(db: ConversationDb, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Purge loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = db.purge_expired(chrono::Utc::now()).await {
                        error!("Retention purge failed: {:#}", e);
                    }
                }
            }
        }
    })
}

/// Await a background task, logging a panic instead of dropping it.
/// Returns false if the task panicked or was aborted.
async fn join_logged(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("{} task panicked: {}", name, e);
            false
        }
    }
}

async fn cmd_route(config_path: &Option<PathBuf>, request: TriageRequest) -> Result<()> {
    let cfg = CarerouteConfig::load_or_default(config_path)?;
    let router = Router::new(Arc::new(load_profiles(&cfg)?), cfg.router.clone());

    let request = careroute_core::service::validate(request)?;
    let decision = router.route(&request.message, &request.caller_context, request.explicit_handler);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, request: TriageRequest) -> Result<()> {
    let cfg = CarerouteConfig::load(config_path)?;
    let db = open_db(&cfg)?;
    let service = build_service(&cfg, Arc::new(db))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let response = service.handle(request, &cancel).await?;
    service.recorder().flush().await;

    if response.degraded {
        warn!("Handler unavailable; showing fallback text");
    }
    println!("{}", response.response_text);
    eprintln!(
        "[{} | confidence {:.2}{} | conversation {}]",
        response.selected_handler_id,
        response.confidence,
        if response.emergency_override_applied { " | EMERGENCY" } else { "" },
        response.conversation_id
    );
    Ok(())
}

async fn cmd_purge(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CarerouteConfig::load(config_path)?;
    let db = open_db(&cfg)?;
    let deleted = db.purge_expired(chrono::Utc::now()).await?;
    let remaining = db.count().await?;
    println!("Purged {} expired turns ({} remaining).", deleted, remaining);
    Ok(())
}

async fn cmd_history(config_path: &Option<PathBuf>, conversation_id: Option<&str>, limit: usize) -> Result<()> {
    let cfg = CarerouteConfig::load(config_path)?;
    let db = open_db(&cfg)?;

    let turns = match conversation_id {
        Some(id) => db.turns_for(id).await?,
        None => db.recent_turns(limit).await?,
    };
    if turns.is_empty() {
        println!("No recorded turns.");
        return Ok(());
    }
    for turn in &turns {
        print_turn(turn);
    }
    Ok(())
}

fn print_turn(turn: &StoredTurn) {
    let r = &turn.record;
    println!(
        "{} [{}] {} via {} ({}, expires {})",
        r.timestamp.format("%Y-%m-%d %H:%M:%S"),
        r.conversation_id,
        r.caller_id,
        r.handler_id,
        r.urgency,
        r.expires_at.format("%Y-%m-%d")
    );
    println!("  > {}", r.input);
    println!("  < {}", r.output);
}

fn open_db(cfg: &CarerouteConfig) -> Result<ConversationDb> {
    let path = config::expand_home(&cfg.storage.db_path);
    ConversationDb::new(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn load_profiles(cfg: &CarerouteConfig) -> Result<ProfileStore> {
    let store = match &cfg.profiles.path {
        Some(path) => {
            let path = config::expand_home(path);
            ProfileStore::load(&path).with_context(|| format!("Failed to load profiles from {}", path.display()))?
        }
        None => ProfileStore::embedded().context("Built-in profiles are invalid")?,
    };
    info!(
        "Loaded {} handler profiles (version {})",
        store.profiles().len(),
        store.version()
    );
    Ok(store)
}

/// Wire the engine once at startup: profiles → router, HTTP transport →
/// dispatcher, store → recorder.
fn build_service(
    cfg: &CarerouteConfig,
    store: Arc<dyn careroute_core::ConversationStore>,
) -> Result<TriageService> {
    let router = Router::new(Arc::new(load_profiles(cfg)?), cfg.router.clone());

    let handler_token = Some(cfg.handlers.auth_token.clone()).filter(|t| !t.is_empty());
    let transport = HttpTransport::new(cfg.handlers.base_url.clone()).with_auth_token(handler_token);
    let dispatcher = Dispatcher::new(
        Arc::new(transport),
        cfg.handlers.endpoints.clone(),
        Duration::from_secs(cfg.handlers.timeout_secs),
    );

    let recorder = ConversationRecorder::new(store, cfg.storage.retention.clone());
    Ok(TriageService::new(router, dispatcher, recorder))
}
