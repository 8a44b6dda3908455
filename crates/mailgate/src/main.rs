//! `mailgate` - standalone ESMTP receiving server
//!
//! Accepts mail for the configured local domains and writes it to a spool
//! directory. All protocol handling lives in `mailgate-smtp`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod settings;
mod spool;

use anyhow::Context;
use mailgate_smtp::{Engine, Handler, Upgrader};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings::Settings;
use spool::SpoolHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailgate=info,mailgate_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mailgate {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(Settings::locate().as_deref())?;
    let config = settings.engine_config()?;
    let handler = SpoolHandler::create(&settings.spool_dir, settings.local_domains.clone()).await?;
    let engine = Engine::new(config, handler).context("creating engine")?;

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(
        listen = %settings.listen,
        hostname = %engine.config().hostname,
        spool = %engine.handler().dir().display(),
        "Listening"
    );

    match settings.upgrader()? {
        Some(tls) => {
            info!("STARTTLS enabled");
            serve(listener, engine.with_tls(tls)).await
        }
        None => serve(listener, engine).await,
    }
}

/// Accepts connections until interrupted, one task per session.
async fn serve<H: Handler, U: Upgrader>(listener: TcpListener, engine: Engine<H, U>) -> anyhow::Result<()> {
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(%err, "Accept failed");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    error!(%err, %peer, "Could not disable Nagle");
                }

                let id = next_id;
                next_id += 1;
                let engine = engine.clone();
                tokio::spawn(
                    async move {
                        engine.serve(stream, Some(peer)).await;
                    }
                    .instrument(tracing::info_span!("connection", id)),
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for shutdown signal")?;
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
