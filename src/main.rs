use clap::Parser;
use qrisgate_core::cli::{
    self, AlertCommands, Cli, Commands, DbCommands, KeyCommands, MerchantCommands, RefundCommands,
};
use qrisgate_core::config::{Config, ConfigInfo};
use qrisgate_core::services::scheduler;
use qrisgate_core::upstream::HttpCreditProvider;
use qrisgate_core::{create_app, db, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ConfigInfo { config, overrides } = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !overrides.is_empty() {
        tracing::info!("environment overrides: {}", overrides.join(", "));
    }

    match cli.command {
        Some(Commands::Serve) | None => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Merchant(cmd)) => match cmd {
            MerchantCommands::Create { email, phone } => {
                cli::handle_merchant_create(&config, &email, phone).await
            }
            MerchantCommands::Approve { merchant_id } => {
                cli::handle_merchant_approve(&config, &merchant_id).await
            }
            MerchantCommands::SetWebhook {
                merchant_id,
                env,
                url,
                enabled,
            } => cli::handle_merchant_set_webhook(&config, &merchant_id, &env, &url, enabled).await,
            MerchantCommands::SetIps {
                merchant_id,
                entries,
                enabled,
            } => {
                cli::handle_merchant_set_ips(&config, &merchant_id, entries.as_deref(), enabled)
                    .await
            }
        },
        Some(Commands::Keys(cmd)) => match cmd {
            KeyCommands::Mint { merchant_id, env } => {
                cli::handle_keys_mint(&config, &merchant_id, &env, false).await
            }
            KeyCommands::Rotate { merchant_id, env } => {
                cli::handle_keys_mint(&config, &merchant_id, &env, true).await
            }
        },
        Some(Commands::Refund(RefundCommands::Process { refund_id })) => {
            cli::handle_refund_process(&config, &refund_id).await
        }
        Some(Commands::Alerts(cmd)) => match cmd {
            AlertCommands::List { all } => cli::handle_alerts_list(&config, all).await,
            AlertCommands::Resolve { alert_id } => {
                cli::handle_alerts_resolve(&config, &alert_id).await
            }
        },
        Some(Commands::Config) => cli::handle_config_validate(&config, &overrides),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database_path).await?;

    // Idempotent schema installation
    db::migrations::run(&pool).await?;
    tracing::info!("schema migrations completed");

    let upstream = Arc::new(HttpCreditProvider::new(config.upstream_base_url.clone()));
    tracing::info!("upstream provider at {}", config.upstream_base_url);

    let state = AppState::new(pool, config.clone(), upstream);

    // Lifecycle scheduler: expiry scan, cache GC, webhook pump.
    tokio::spawn(scheduler::run(state.clone()));

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
