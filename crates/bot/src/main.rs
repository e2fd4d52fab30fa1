use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdbot_bot::config::BotConfig;
use sdbot_bot::router::Bot;
use sdbot_queue::{JobQueue, QueueEvent};
use sdbot_sdapi::{SdApi, SdBackend};
use sdbot_telegram::{PollerConfig, TelegramApi, TelegramReplies, UpdatePoller};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_file = match std::env::var_os("ENVFILE") {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sdbot=info,sdbot_bot=info,sdbot_queue=info,sdbot_sdapi=info,\
                 sdbot_telegram=info,sdbot_core=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = env_file {
        tracing::debug!(error = %e, "No env file loaded");
    }

    // --- Configuration ---
    let config = BotConfig::parse();
    let defaults = config.generation_defaults();
    let access = config.access_policy();
    tracing::info!(
        sd_api = %config.sd_api,
        default_model = %defaults.model,
        default_sampler = %defaults.sampler,
        admins = access.admins().len(),
        "Loaded bot configuration",
    );

    // --- Backends ---
    let backend = Arc::new(SdBackend::new(SdApi::new(config.sd_api.clone())));
    let api = Arc::new(TelegramApi::new(config.bot_token.clone()));
    let me = api.get_me().await?;
    let username = me.username.unwrap_or_default();
    tracing::info!(bot_id = me.id, username = %username, "Connected to Telegram");

    let replies = Arc::new(TelegramReplies::new(Arc::clone(&api)));
    let shutdown = CancellationToken::new();

    // --- Job queue ---
    let (queue, queue_handle) = JobQueue::start(
        backend.clone(),
        replies.clone(),
        config.queue_config(),
        shutdown.clone(),
    );
    let events_handle = tokio::spawn(log_queue_events(queue.subscribe(), shutdown.clone()));

    // --- Update routing ---
    let bot = Arc::new(Bot::new(
        queue,
        backend,
        replies.clone(),
        api.clone(),
        access.clone(),
        defaults,
        username,
    ));
    let poller = UpdatePoller::new(api, PollerConfig::default());
    let poller_cancel = shutdown.clone();
    let poller_handle = tokio::spawn(async move { poller.run(bot, poller_cancel).await });

    for &admin in access.admins() {
        if let Err(e) = replies.send_text(admin, "🤖 Bot started").await {
            tracing::warn!(admin, error = %e, "Admin notice failed");
        }
    }

    shutdown_signal().await;

    // --- Shutdown ---
    shutdown.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, poller_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, queue_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, events_handle).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn log_queue_events(
    mut events: tokio::sync::broadcast::Receiver<QueueEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => tracing::debug!(
                entry_id = event.entry_id,
                state = ?event.state,
                at = %event.timestamp,
                "Queue event",
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Queue event logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
