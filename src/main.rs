//! `tablestream` receiver.
//!
//! Accepts streaming connections and logs every message delivered to each
//! session. Useful for exercising peers against the inbound pipeline.

mod cli;

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use clap::Parser;
use log::{info, warn};
use tablestream::{
    BufferPool,
    ConnectionId,
    ConnectionInfo,
    InboundConfig,
    InboundHandler,
    RegistryProvider,
    SessionError,
    SessionId,
    SessionProvider,
    SessionRegistry,
    StreamMessage,
    StreamSession,
    message::StreamInitMessage,
    serve_connection,
};
use tokio::{net::TcpListener, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Session that logs what it receives and forgets it.
struct LoggingSession {
    id: SessionId,
    messages: AtomicU64,
}

#[async_trait]
impl StreamSession for LoggingSession {
    fn id(&self) -> SessionId { self.id }

    fn attach_inbound(&self, connection: &ConnectionInfo) {
        info!("{} attached to session {}", connection.log_tag(), self.id);
    }

    async fn receive(&self, message: StreamMessage) -> Result<(), SessionError> {
        let seen = self.messages.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "session received message: session={}, kind={}, count={seen}",
            self.id,
            message.kind()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = match &cli.config {
        Some(path) => InboundConfig::load(path)?,
        None => InboundConfig::default(),
    };

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("serving metrics: addr={addr}");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        warn!("metrics support not compiled in; ignoring --metrics-addr");
    }

    let registry = Arc::new(SessionRegistry::new());
    let provider: Arc<dyn SessionProvider> = Arc::new(RegistryProvider::new(
        Arc::clone(&registry),
        |id: SessionId, init: &StreamInitMessage, _connection: &ConnectionInfo| {
            info!(
                "new session: id={id}, operation={}",
                init.operation.description()
            );
            LoggingSession {
                id,
                messages: AtomicU64::new(0),
            }
        },
    ));
    let pool = BufferPool::new();
    let listener = TcpListener::bind(cli.listen).await?;
    info!("listening: addr={}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let next_id = AtomicU64::new(1);
    let mut delay = Duration::from_millis(10);
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => break,

            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    delay = Duration::from_millis(10);
                    let id = ConnectionId::new(next_id.fetch_add(1, Ordering::Relaxed));
                    let connection = ConnectionInfo::new(id, peer, config.protocol_version);
                    let handler = match InboundHandler::with_shutdown(
                        connection,
                        Arc::clone(&provider),
                        config,
                        &shutdown,
                    ) {
                        Ok(handler) => handler,
                        Err(e) => {
                            warn!("{} rejecting connection: error={e}", connection.log_tag());
                            continue;
                        }
                    };
                    let pool = Arc::clone(&pool);
                    tracker.spawn(async move {
                        if let Err(e) = serve_connection(stream, &handler, &pool, &config).await {
                            warn!("{} connection ended with error: error={e}", connection.log_tag());
                        }
                    });
                }
                Err(e) => {
                    warn!("accept error: error={e}");
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(1));
                }
            },
        }
    }

    info!("shutting down: active_sessions={}", registry.len());
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
    Ok(())
}
