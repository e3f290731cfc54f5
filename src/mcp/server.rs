//! MCP server over stdio.
//!
//! This module runs the newline-delimited JSON-RPC loop:
//!
//! 1. **Read**: one message per line from the transport
//! 2. **Dispatch**: each request runs in its own task, so a slow tool does
//!    not hold up the next line
//! 3. **Write**: replies are funnelled through a channel to the single writer
//!
//! The loop ends at EOF (after in-flight replies have been written) or when
//! the shutdown future resolves.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::mcp::dispatcher::{DispatchTimeouts, Dispatcher};
use crate::mcp::protocol::{parse_message, IncomingMessage, JsonRpcError, JsonRpcReply, Method};
use crate::mcp::registry::Registries;
use crate::mcp::transport::StdioTransport;

/// The stdio MCP server. One client, one dispatcher.
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    /// Creates a server answering from `registries`.
    #[must_use]
    pub fn new(registries: Registries, timeouts: DispatchTimeouts) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(registries, timeouts)),
        }
    }

    /// The connection's dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Runs the server on stdin/stdout until EOF or a termination signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&self) -> io::Result<()> {
        self.serve(StdioTransport::new(), shutdown_signal()).await
    }

    /// Runs the message loop on `transport` until EOF or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve<R, W, F>(&self, mut transport: StdioTransport<R, W>, shutdown: F) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcReply>();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("stdio server shutting down");
                    return Ok(());
                }

                Some(reply) = rx.recv() => {
                    transport.write_message(&reply).await?;
                }

                line = transport.read_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            tracing::info!("stdin closed");
                            break;
                        }
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            tracing::debug!(error = %e, "rejected line that is not UTF-8");
                            transport.write_message(&JsonRpcError::parse_error()).await?;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.handle_line(&line, &tx, &mut transport).await?;
                }
            }
        }

        // Let in-flight requests finish and flush their replies.
        drop(tx);
        while let Some(reply) = rx.recv().await {
            transport.write_message(&reply).await?;
        }
        Ok(())
    }

    async fn handle_line<R, W>(
        &self,
        line: &str,
        replies: &mpsc::UnboundedSender<JsonRpcReply>,
        transport: &mut StdioTransport<R, W>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let msg = match parse_message(line) {
            Ok(msg) => msg,
            Err(error) => {
                tracing::debug!(code = error.error.code, "rejected malformed message");
                return transport.write_message(&error).await;
            }
        };

        match msg {
            // Initialisation settles the lifecycle state, so it never races
            // requests read after it.
            IncomingMessage::Request(req) if req.method == Method::Initialize.as_str() => {
                let reply = self.dispatcher.handle_request(req).await;
                transport.write_message(&reply).await
            }
            IncomingMessage::Request(req) => {
                let dispatcher = Arc::clone(&self.dispatcher);
                let replies = replies.clone();
                tokio::spawn(async move {
                    let reply = dispatcher.handle_request(req).await;
                    if replies.send(reply).is_err() {
                        tracing::warn!("reply dropped, server loop has exited");
                    }
                });
                Ok(())
            }
            notification @ IncomingMessage::Notification(_) => {
                self.dispatcher.handle_message(notification).await;
                Ok(())
            }
        }
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves when the process receives Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
