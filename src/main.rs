use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use post_relay::channels::telegram::{self, Inbound};
use post_relay::channels::{SmtpSink, TelegramChannel};
use post_relay::config::RelayConfig;
use post_relay::pipeline::{GroupCoalescer, IngestDispatcher, PostPipeline};
use post_relay::workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Seed the environment from .env if present
    dotenvy::dotenv().ok();

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().context("loading configuration")?;

    eprintln!("📮 Post Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Telegram: allowed {}",
        if config.allows_everyone() {
            "everyone".to_string()
        } else {
            config.allowed_users.join(", ")
        }
    );
    eprintln!(
        "   Email: {} → {} via {}:{}",
        config.email.sender, config.email.recipient, config.email.smtp_host, config.email.smtp_port
    );
    eprintln!("   Staging: {}", config.temp_dir.display());
    eprintln!("   Burst window: {:?}\n", config.flush_delay);

    // ── Staging ──────────────────────────────────────────────────────────
    let workspaces = WorkspaceManager::new(config.temp_dir.clone());
    workspaces.ensure_root().await?;

    // ── Telegram ─────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        config.telegram_bot_token,
        config.allowed_users,
    ));
    telegram.health_check().await?;
    if let Err(e) = telegram.drop_pending_updates().await {
        tracing::warn!(error = %e, "Could not drop pending updates");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let sink = Arc::new(SmtpSink::new(config.email));
    let pipeline = Arc::new(
        PostPipeline::new(workspaces, telegram.clone(), sink, telegram.clone())
            .with_oversize_threshold(config.warn_size_bytes),
    );
    let coalescer = Arc::new(GroupCoalescer::new(config.flush_delay, pipeline.clone()));
    let dispatcher = IngestDispatcher::new(coalescer.clone(), pipeline);

    let mut updates = telegram.start();

    loop {
        tokio::select! {
            inbound = updates.next() => {
                let Some(inbound) = inbound else {
                    tracing::warn!("Telegram stream ended");
                    break;
                };
                match inbound {
                    Inbound::Post(event) => {
                        dispatcher.dispatch(event);
                    }
                    Inbound::Command { chat_id, name } => {
                        if let Some(reply) = telegram::command_reply(&name) {
                            let telegram = telegram.clone();
                            tokio::spawn(async move {
                                if let Err(e) = telegram.send_message(chat_id, reply).await {
                                    tracing::warn!(chat_id, error = %e, "Failed to answer command");
                                }
                            });
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    coalescer.flush_all().await;
    tracing::info!("Post relay stopped");
    Ok(())
}
