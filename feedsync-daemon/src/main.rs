use std::process::ExitCode;
use std::sync::Arc;

use feedsync_core::{
    shared_account, shared_articles, spawn_refresher, DataApi, NewsBlurClient, PendingLedger,
    SyncConfig, SyncEngine, SyncError, SyncEvent,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PASSWORD_ENV: &str = "FEEDSYNC_PASSWORD";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "feedsync daemon stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run() -> Result<(), SyncError> {
    let config = SyncConfig::load();
    let client = NewsBlurClient::from_config(&config.service)?;
    login(&client, &config).await?;

    // Linux: ~/.config/feedsync
    let (data_api, loaded) = DataApi::load_from_dir(SyncConfig::config_dir()?).await;
    let ledger = PendingLedger::load_from(data_api.ledger_path()).await;
    // nothing survives a restart in flight
    ledger.reset_all_selected_for_processing().await?;

    let (event_tx, event_rx) = mpsc::channel(64);
    let client = Arc::new(client);
    let engine = SyncEngine::builder(
        shared_account(loaded.account),
        shared_articles(loaded.articles),
        ledger,
        client.clone(),
        client,
    )
    .metadata(loaded.metadata)
    .data_api(data_api)
    .events(event_tx)
    .config(config.clone())
    .build();

    let events = tokio::spawn(log_events(event_rx));
    let refresher = spawn_refresher(Arc::new(engine), config.refresh.interval());
    info!(interval_minutes = config.refresh.interval_minutes, "refresher started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    refresher.stop().await?;
    events.await?;
    Ok(())
}

async fn login(client: &NewsBlurClient, config: &SyncConfig) -> Result<(), SyncError> {
    let Some(username) = config.service.username.as_deref() else {
        warn!("no username configured, relying on an existing session");
        return Ok(());
    };
    let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
    client.login(username, &password).await?;
    info!(username, "logged in");
    Ok(())
}

async fn log_events(mut rx: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SyncEvent::RefreshFinished(summary) => info!(
                feeds_downloaded = summary.feeds_downloaded,
                articles_created = summary.articles_created,
                statuses_adopted = summary.statuses_adopted,
                "refresh cycle complete"
            ),
            SyncEvent::RefreshFailed(reason) => warn!(%reason, "refresh cycle failed"),
            SyncEvent::MirrorFailed(reason) => warn!(%reason, "record store mirroring failed"),
        }
    }
}
