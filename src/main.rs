use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use potsweep::api::{create_router, run_state_cleanup, ApiState, StateManager};
use potsweep::auth::UserTokenStore;
use potsweep::config::{load_config, AppConfig};
use potsweep::credentials::{CredentialStore, Provider, SecretBox};
use potsweep::monzo::MonzoClient;
use potsweep::oauth::{ProviderConfig, ProviderRegistry, TokenManager};
use potsweep::reconcile::scheduler::DailyScheduler;
use potsweep::reconcile::ReconcileJob;
use potsweep::rules::RuleStore;
use potsweep::truelayer::TrueLayerClient;
use std::sync::Arc;
use tracing::{info, warn};

const STATE_CLEANUP_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(
    name = "potsweep",
    version,
    about = "Keeps a Monzo pot topped up to cover credit card balances"
)]
struct Cli {
    /// TOML configuration file; built-in defaults apply when omitted
    #[arg(long, env = "POTSWEEP_CONFIG", value_name = "path")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the daily reconciliation scheduler
    Serve,
    /// Reconcile every user once and exit
    Reconcile,
    /// Print a fresh base64 encryption key
    GenKey,
    /// Issue an API token for a user and print it
    IssueToken {
        /// User id the token authenticates as
        #[arg(long)]
        user: String,
    },
    /// Revoke a previously issued API token
    RevokeToken {
        #[arg(long)]
        token: String,
    },
}

struct Components {
    rules: Arc<RuleStore>,
    user_tokens: Arc<UserTokenStore>,
    tokens: Arc<TokenManager>,
    job: Arc<ReconcileJob>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "potsweep=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Command::GenKey = cli.command {
        println!("{}", SecretBox::generate_key());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    // Token administration only needs the database
    match &cli.command {
        Command::IssueToken { user } => {
            let token = UserTokenStore::new(&config.database.path)
                .context("Failed to initialize token store")?
                .issue(user)
                .with_context(|| format!("Failed to issue token for '{}'", user))?;
            info!(user_id = %user, "API token issued");
            println!("{}", token);
            return Ok(());
        }
        Command::RevokeToken { token } => {
            let revoked = UserTokenStore::new(&config.database.path)
                .context("Failed to initialize token store")?
                .revoke(token)?;
            info!(revoked, "API token revocation processed");
            return Ok(());
        }
        _ => {}
    }

    let components = build(&config)?;

    match cli.command {
        Command::Serve => serve(&config, components).await,
        Command::Reconcile => {
            let report = components.job.run().await?;
            info!(
                users = report.users.len(),
                transfers = report.transfer_count(),
                failed_users = report.failed_users(),
                "Reconciliation complete"
            );
            Ok(())
        }
        Command::GenKey | Command::IssueToken { .. } | Command::RevokeToken { .. } => Ok(()),
    }
}

fn build(config: &AppConfig) -> Result<Components> {
    let encryption_key = std::env::var("POTSWEEP_ENCRYPTION_KEY")
        .context("POTSWEEP_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let secret_box = Arc::new(
        SecretBox::from_base64(&encryption_key).context("Invalid POTSWEEP_ENCRYPTION_KEY")?,
    );

    let credentials = Arc::new(
        CredentialStore::new(&config.database.path)
            .context("Failed to initialize credential store")?,
    );
    let rules = Arc::new(
        RuleStore::new(&config.database.path).context("Failed to initialize rule store")?,
    );
    let user_tokens = Arc::new(
        UserTokenStore::new(&config.database.path)
            .context("Failed to initialize token store")?,
    );
    info!(database = %config.database.path, "Stores initialized");

    let mut providers = ProviderRegistry::new();
    for (provider, endpoints) in [
        (Provider::TrueLayer, &config.providers.truelayer),
        (Provider::Monzo, &config.providers.monzo),
    ] {
        match ProviderConfig::from_env(provider, endpoints) {
            Some(provider_config) => providers = providers.with(provider_config),
            None => warn!(
                provider = %provider,
                "OAuth client credentials not set, provider cannot connect or refresh"
            ),
        }
    }

    let http = config.http.build_client()?;
    let tokens = Arc::new(
        TokenManager::new(Arc::clone(&credentials), secret_box, providers, http.clone())
            .with_refresh_leeway(chrono::Duration::seconds(config.tokens.refresh_leeway_seconds)),
    );

    let reader = Arc::new(TrueLayerClient::new(
        Arc::clone(&tokens),
        http.clone(),
        config.providers.truelayer.api_base_url.clone(),
    ));
    let writer = Arc::new(MonzoClient::new(
        http,
        config.providers.monzo.api_base_url.clone(),
    ));

    let job = Arc::new(ReconcileJob::new(
        credentials,
        Arc::clone(&rules),
        Arc::clone(&tokens),
        reader,
        writer,
        config.reconcile.clone(),
    ));

    Ok(Components {
        rules,
        user_tokens,
        tokens,
        job,
    })
}

async fn serve(config: &AppConfig, components: Components) -> Result<()> {
    let state_manager = StateManager::new(config.server.oauth_state_expiry_seconds);
    let cleanup_handle = tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        STATE_CLEANUP_INTERVAL_SECS,
    ));

    let scheduler = DailyScheduler::new(Arc::clone(&components.job), config.reconcile.run_at()?);
    let scheduler_handle = tokio::spawn(async move { scheduler.run_loop().await });

    let router = create_router(ApiState {
        tokens: components.tokens,
        rules: components.rules,
        user_tokens: components.user_tokens,
        state_manager,
        auth_enabled: config.server.auth_enabled,
        callback_base_url: config.server.callback_base_url.clone(),
    });

    if !config.server.auth_enabled {
        warn!("Authentication disabled, every request acts as the default user");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    scheduler_handle.abort();
    cleanup_handle.abort();
    info!("potsweep stopped");

    Ok(())
}
