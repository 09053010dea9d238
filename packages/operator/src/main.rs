use std::sync::Arc;

use bridge_operator::address::Bech32Validator;
use bridge_operator::api::{self, AppState};
use bridge_operator::claims::{ClaimAuthority, ClaimDomain};
use bridge_operator::config::Config;
use bridge_operator::db::{self, PgClaimStore, PgConfirmationStore};
use bridge_operator::destination::VaultClient;
use bridge_operator::orchestrator::{AllocationOrchestrator, AllocationSettings};
use bridge_operator::service::BridgeService;
use bridge_operator::signer::{ClaimSigner, LocalKeySigner};
use bridge_operator::source::evm::EvmRpcReader;
use bridge_operator::store::ConfirmationStore;
use bridge_operator::tracker::ConfirmationTracker;
use bridge_operator::worker::{Worker, WorkerSettings};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // .env may carry LOG_FORMAT, so load it before the subscriber
    let _ = dotenvy::dotenv();
    init_logging();

    tracing::info!("Starting bridge operator");

    let config = Config::load()?;
    tracing::info!(
        source_chain_id = config.source.chain_id,
        vault_chain_id = %config.vault.chain_id,
        vault = %config.vault.vault_address,
        required_confirmations = config.source.required_confirmations,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let records: Arc<dyn ConfirmationStore> = Arc::new(PgConfirmationStore::new(pool.clone()));
    let claim_store = Arc::new(PgClaimStore::new(pool));

    let reader = Arc::new(EvmRpcReader::new(
        config.source.rpc_urls.clone(),
        config.source.rpc_timeout,
    )?);
    let vault = Arc::new(VaultClient::new(config.vault.clone())?);
    tracing::info!(operator = %vault.address, "Vault client ready");

    let signer = Arc::new(LocalKeySigner::from_hex(&config.claims.signer_key)?);
    tracing::info!(
        claim_signer = %hex::encode(signer.public_key()),
        "Claim signer loaded"
    );

    let validator = Arc::new(Bech32Validator);

    let tracker = Arc::new(ConfirmationTracker::new(
        reader,
        records.clone(),
        config.source.custody_address,
        config.source.required_confirmations,
        config.source.rpc_timeout,
    ));
    let orchestrator = Arc::new(AllocationOrchestrator::new(
        records.clone(),
        vault.clone(),
        validator.clone(),
        AllocationSettings {
            custody: config.source.custody_address,
            routes: config.allocation.routes.clone(),
            address_prefix: config.vault.address_prefix.clone(),
            fee_bps: config.allocation.fee_bps,
            retry: config.allocation.retry.clone(),
        },
    ));
    let claims = Arc::new(ClaimAuthority::new(
        claim_store,
        vault,
        signer,
        validator,
        ClaimDomain {
            vault_chain_id: config.vault.chain_id.clone(),
            vault_address: config.vault.vault_address.clone(),
            address_prefix: config.vault.address_prefix.clone(),
            claim_ttl: config.claims.ttl,
        },
    ));

    let service = Arc::new(BridgeService::new(
        tracker.clone(),
        orchestrator.clone(),
        claims,
    ));

    let worker = Worker::new(
        records.clone(),
        tracker,
        orchestrator,
        WorkerSettings {
            poll_interval: config.worker.poll_interval,
            batch_size: config.worker.batch_size,
            auto_allocate: config.worker.auto_allocate,
            backoff: config.allocation.retry.clone(),
        },
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let api_addr = config.api.bind_address;
    let api_state = AppState::new(service, records);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Operator initialized, starting processing");

    tokio::select! {
        result = worker.run(shutdown_rx) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker error");
            }
        }
        _ = api_handle => {
            tracing::error!("API server exited");
        }
    }

    tracing::info!("Bridge operator stopped");
    Ok(())
}

/// Initialize tracing/logging; `LOG_FORMAT=json` selects JSON lines
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_operator=debug"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true).with_thread_ids(true)))
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
