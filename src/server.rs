//! # Server
//!
//! TCP listener that hands every accepted connection to its own worker task. A worker
//! runs the pipeline in a loop, one message at a time, until the pipeline fails (a peer
//! closing the stream included), then closes the socket.
//!
//! ```text
//! Listening --accept--> spawn worker --> Listening
//!                          worker: Serving --error/EOF--> Closed
//! ```
//!
//! Per-connection failures are logged and stay local to that connection. Only
//! `BindFailure` and `AcceptFailure` reach the caller.

use crate::config::{NetworkConfig, ServerConfig};
use crate::core::connection::Connection;
use crate::error::{PipelineError, Result};
use crate::pipeline::engine::Pipeline;
use crate::pipeline::stage::StageContext;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::compression::Compression;
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// How often the drain loop checks for remaining connections
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    pipeline: Pipeline,
    ctx: StageContext,
    metrics: Arc<Metrics>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Bind a listener on `address`.
    ///
    /// # Errors
    /// `ConfigError` if the pipeline does not fit `config`, `BindFailure` if the address
    /// is invalid or already in use.
    pub async fn bind(address: &str, config: ServerConfig, pipeline: Pipeline) -> Result<Self> {
        pipeline.validate(&config)?;

        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|source| PipelineError::BindFailure {
                    address: address.to_string(),
                    source,
                })?;
        let local_addr = listener.local_addr()?;

        let metrics = Arc::new(Metrics::new());
        let ctx = StageContext::new(config).with_metrics(metrics.clone());

        info!(address = %local_addr, "Listening");
        Ok(Self {
            listener,
            local_addr,
            pipeline,
            ctx,
            metrics,
            shutdown_timeout: crate::config::SHUTDOWN_TIMEOUT,
        })
    }

    /// Bind using every section of a loaded [`NetworkConfig`]
    pub async fn from_config(config: &NetworkConfig, pipeline: Pipeline) -> Result<Self> {
        config.validate_strict()?;
        let server = Self::bind(&config.server.address, config.server_config()?, pipeline)
            .await?
            .with_buffer_pool(BufferPool::new(config.server.buffer_pool_size))
            .with_shutdown_timeout(config.server.shutdown_timeout);

        Ok(if config.compression.enabled {
            server.with_compression(Compression::from_config(&config.compression))
        } else {
            server
        })
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.ctx = self.ctx.with_compression(compression);
        self
    }

    /// Replace the scratch buffer pool. Set this before [`Server::with_compression`] so
    /// the compression engine shares it.
    pub fn with_buffer_pool(mut self, buffers: BufferPool) -> Self {
        self.ctx = self.ctx.with_buffer_pool(buffers);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    /// `AcceptFailure` when accepting fails; connection errors never end the loop.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `signal` completes, then stop listening and give active
    /// connections up to the shutdown timeout to finish. Workers still running after that
    /// are left to end on their own.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            local_addr,
            pipeline,
            ctx,
            metrics,
            shutdown_timeout,
        } = self;
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                _ = &mut signal => {
                    info!(address = %local_addr, "Shutting down server. Waiting for connections to close...");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| {
                        error!(error = %e, "Error accepting connection");
                        PipelineError::AcceptFailure(e)
                    })?;

                    metrics.connection_established();
                    let pipeline = pipeline.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(pipeline, ctx, stream, peer).await;
                    });
                }
            }
        }

        drop(listener);
        drain(&metrics, shutdown_timeout).await;
        metrics.log_metrics();
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

async fn drain(metrics: &Metrics, timeout: Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let connections = metrics.connections_active.load(Ordering::Relaxed);
        if connections == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                warn!(connections, "Shutdown timeout reached, leaving connections to finish");
                return;
            }
            _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

/// Decrements the active connection count however the worker ends
struct ActiveConnection<'a>(&'a Metrics);

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

#[instrument(skip(pipeline, ctx, stream), fields(peer = %peer))]
async fn handle_connection(
    pipeline: Pipeline,
    ctx: StageContext,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let _active = ActiveConnection(ctx.metrics());
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    debug!("Connection accepted");

    let mut conn = Connection::with_peer(stream, peer);
    loop {
        match pipeline.run(&ctx, &mut conn, Bytes::new()).await {
            Ok(_) => ctx.metrics().message_processed(),
            Err(e) if e.is_disconnect() => {
                debug!(error = %e, "Peer disconnected");
                ctx.metrics().disconnect();
                break;
            }
            Err(e) => {
                warn!(error = %e, "Closing connection after pipeline error");
                ctx.metrics().pipeline_error();
                break;
            }
        }
    }

    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Socket shutdown failed");
    }
}

/// Serve `pipeline` with the settings in `config` until Ctrl-C
#[instrument(skip_all, fields(address = %config.server.address))]
pub async fn start_server(config: &NetworkConfig, pipeline: Pipeline) -> Result<()> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let server = Server::from_config(config, pipeline).await?;
    server
        .run_until(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::Stage;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn bind_rejects_bad_address() {
        let config = ServerConfig::tlv("BF", 4).unwrap();
        let pipeline = Pipeline::standard(&config, false, |_, b| Ok(b.to_vec()));
        let result = Server::bind("not an address", config, pipeline).await;
        assert!(matches!(result, Err(PipelineError::BindFailure { .. })));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn bind_rejects_port_in_use() {
        let config = ServerConfig::end_marker("\n").unwrap();
        let pipeline = Pipeline::standard(&config, false, |_, b| Ok(b.to_vec()));
        let first = Server::bind("127.0.0.1:0", config.clone(), pipeline.clone())
            .await
            .unwrap();
        let taken = first.local_addr().to_string();
        assert!(matches!(
            Server::bind(&taken, config, pipeline).await,
            Err(PipelineError::BindFailure { .. })
        ));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn bind_validates_pipeline() {
        let config = ServerConfig::end_marker("\n").unwrap();
        let pipeline = Pipeline::new(vec![Stage::DecodeTlv, Stage::echo(), Stage::EncodeTlv]);
        assert!(matches!(
            Server::bind("127.0.0.1:0", config, pipeline).await,
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn run_until_returns_without_connections() {
        let config = ServerConfig::tlv("BF", 4).unwrap();
        let pipeline = Pipeline::standard(&config, false, |_, b| Ok(b.to_vec()));
        let server = Server::bind("127.0.0.1:0", config, pipeline)
            .await
            .unwrap()
            .with_shutdown_timeout(Duration::from_millis(100));
        server.run_until(async {}).await.unwrap();
    }
}
