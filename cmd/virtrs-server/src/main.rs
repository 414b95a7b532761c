use clap::Parser;
use pkg_api::AppState;
use pkg_api::auth::{
    AuthConfig, AuthGate, DelegatedAuthenticator, StaticTokenDecryptor, TokenDecryptor,
    WebhookAuthenticator,
};
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::auth::{DEFAULT_AUTH_PATH_PREFIX, DEFAULT_AUTH_TIMEOUT_MS};
use pkg_constants::paths::{DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_DATA_DIR, DEFAULT_SERVER_PORT};
use pkg_constants::rbac::{DEFAULT_MANAGED_GLOBAL_ROLES, DEFAULT_MANAGED_ROLE_TEMPLATES};
use pkg_constants::state::{DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_STORE_TIMEOUT_MS};
use pkg_controllers::{ManagedLabelController, PolicySyncController, PvcMountedByController};
use pkg_metrics::MetricsRegistry;
use pkg_state::ObjectStore;
use pkg_state::memory::MemoryObjectStore;
use pkg_state::slate::SlateObjectStore;
use pkg_types::config::{AuthMode, LogFormat, ServerConfigFile, StoreBackend, load_config_file};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "virtrs-server", about = "virtrs policy and label reconciler")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Object store backend: slatedb or memory
    #[arg(long, value_parser = parse_store)]
    store: Option<StoreBackend>,

    /// Authentication mode: delegated or token
    #[arg(long)]
    auth_mode: Option<AuthMode>,

    /// Token review endpoint for delegated mode
    #[arg(long)]
    authenticator_url: Option<String>,

    /// Log output format: text or json
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_store(s: &str) -> Result<StoreBackend, String> {
    match s {
        "slatedb" => Ok(StoreBackend::Slatedb),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(format!("unknown store '{}' (expected slatedb|memory)", other)),
    }
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}' (expected text|json)", other)),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_format = cli.log_format.or(file_cfg.log_format).unwrap_or_default();
    init_tracing(log_format);
    info!("Config file: {}", cli.config);

    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_SERVER_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let backend = cli.store.or(file_cfg.store).unwrap_or_default();
    let auth_mode = cli.auth_mode.or(file_cfg.auth_mode).unwrap_or_default();
    let authenticator_url = cli.authenticator_url.or(file_cfg.authenticator_url);
    let request_timeout = Duration::from_millis(
        file_cfg
            .request_timeout_ms
            .unwrap_or(DEFAULT_AUTH_TIMEOUT_MS),
    );
    let store_timeout =
        Duration::from_millis(file_cfg.store_timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS));
    let resync_interval = Duration::from_secs(
        file_cfg
            .resync_interval_secs
            .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS),
    );
    let managed_global_roles = file_cfg.managed_global_roles.unwrap_or_else(|| {
        DEFAULT_MANAGED_GLOBAL_ROLES
            .iter()
            .map(|s| s.to_string())
            .collect()
    });
    let managed_role_templates = file_cfg.managed_role_templates.unwrap_or_else(|| {
        DEFAULT_MANAGED_ROLE_TEMPLATES
            .iter()
            .map(|s| s.to_string())
            .collect()
    });

    info!("Starting virtrs-server");
    info!("  Port:      {}", port);
    info!("  Store:     {:?}", backend);
    info!("  Data dir:  {}", data_dir);
    info!("  Auth mode: {:?}", auth_mode);

    let (store, slate): (Arc<dyn ObjectStore>, Option<SlateObjectStore>) = match backend {
        StoreBackend::Slatedb => {
            let slate = SlateObjectStore::open(&data_dir).await?;
            (Arc::new(slate.clone()), Some(slate))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; state is lost on restart");
            (Arc::new(MemoryObjectStore::new()), None)
        }
    };
    let metrics = Arc::new(MetricsRegistry::with_defaults());

    let authenticator: Option<Arc<dyn DelegatedAuthenticator>> = match &authenticator_url {
        Some(url) => Some(Arc::new(WebhookAuthenticator::new(url, request_timeout)?)),
        None => None,
    };
    let decryptor: Option<Arc<dyn TokenDecryptor>> = if auth_mode == AuthMode::Token {
        let table = StaticTokenDecryptor::new(&file_cfg.static_tokens);
        if table.is_empty() {
            warn!("Token mode without static tokens; every API request will be rejected");
        }
        Some(Arc::new(table))
    } else {
        None
    };
    let gate = AuthGate::from_config(
        AuthConfig {
            mode: auth_mode,
            path_prefix: file_cfg
                .auth_path_prefix
                .unwrap_or_else(|| DEFAULT_AUTH_PATH_PREFIX.to_string()),
            ignore_prefixes: file_cfg.auth_ignore_prefixes,
            timeout: request_timeout,
        },
        authenticator,
        decryptor,
    )?;

    let controllers = vec![
        PolicySyncController::new(store.clone(), metrics.clone(), store_timeout, resync_interval)
            .start(),
        PvcMountedByController::new(store.clone(), metrics.clone(), store_timeout, resync_interval)
            .start(),
        ManagedLabelController::new(
            store.clone(),
            managed_global_roles,
            managed_role_templates,
            store_timeout,
            resync_interval,
        )
        .start(),
    ];

    let state = AppState {
        store,
        auth: Arc::new(gate),
        metrics,
        store_timeout,
    };
    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    let served = start_server(config, state, shutdown).await;

    for handle in controllers {
        handle.abort();
    }
    if let Some(slate) = slate {
        slate.close().await?;
    }
    served
}
