//! Transport channel: the single ordered duplex connection to the engine.
//!
//! Two background tasks:
//! - **writer**: drains an mpsc queue into the framed sink, so frames hit the
//!   wire in the order `send` was called
//! - **reader**: started by `on_message`, forwards every reply to the one
//!   registered handler
//!
//! Connection loss (EOF, decode error, write error) or an explicit close emits
//! exactly one `ChannelEvent::Closed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::protocol::{CorrelationToken, EngineReply, EngineRequest, ReplyOutcome};
use super::transport::{BoxedReader, BoxedWriter};
use crate::error::{BridgeError, Result};
use crate::render::Command;

pub type FrameReader = FramedRead<BoxedReader, JsonCodec<EngineReply>>;
pub type FrameWriter = FramedWrite<BoxedWriter, JsonCodec<EngineRequest>>;

/// Inbound event delivered to the registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Reply {
        token: CorrelationToken,
        outcome: ReplyOutcome,
    },
    Closed {
        reason: String,
    },
}

type Handler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

struct ChannelState {
    handler: Option<Handler>,
    closed: Option<String>,
    reader: Option<FrameReader>,
}

struct Shared {
    state: StdMutex<ChannelState>,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Channel state mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let handler = self.lock().handler.clone();
        match handler {
            Some(handler) => handler(event),
            None => tracing::warn!(?event, "Dropping channel event: no handler registered"),
        }
    }

    /// First call wins; later calls are no-ops.
    fn close(&self, reason: String) {
        let handler = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.clone());
            state.reader = None;
            state.handler.clone()
        };

        tracing::debug!(%reason, "Channel closed");
        self.shutdown.cancel();
        if let Some(handler) = handler {
            handler(ChannelEvent::Closed { reason });
        }
    }
}

pub struct Channel {
    outbound: mpsc::UnboundedSender<EngineRequest>,
    next_token: AtomicU64,
    shared: Arc<Shared>,
}

impl Channel {
    /// Wrap an already-handshaken connection and start the writer task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(reader: FrameReader, writer: FrameWriter) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: StdMutex::new(ChannelState {
                handler: None,
                closed: None,
                reader: Some(reader),
            }),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_writer(writer, outbound_rx, Arc::clone(&shared)));

        Self {
            outbound,
            next_token: AtomicU64::new(1),
            shared,
        }
    }

    /// Queue a command for transmission. Never blocks.
    pub fn send(&self, command: Command) -> Result<CorrelationToken> {
        if let Some(reason) = &self.shared.lock().closed {
            return Err(BridgeError::channel_closed(reason.clone()));
        }

        let token = CorrelationToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.outbound
            .send(EngineRequest::Execute {
                token,
                code: command.into_string(),
            })
            .map_err(|_| BridgeError::channel_closed("writer task stopped"))?;

        tracing::trace!(%token, "Queued command");
        Ok(token)
    }

    /// Register the single inbound handler and start reading.
    ///
    /// If the channel is already closed the handler immediately receives
    /// `ChannelEvent::Closed`.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let (reader, closed) = {
            let mut state = self.shared.lock();
            if state.handler.is_some() {
                return Err(BridgeError::HandlerAlreadyRegistered);
            }
            state.handler = Some(Arc::clone(&handler));
            (state.reader.take(), state.closed.clone())
        };

        if let Some(reason) = closed {
            handler(ChannelEvent::Closed { reason });
            return Ok(());
        }

        if let Some(reader) = reader {
            tokio::spawn(run_reader(reader, Arc::clone(&self.shared)));
        }
        Ok(())
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.shared.close(reason.into());
    }

    /// Ask the engine to shut down, then close. Frames already queued are
    /// still written before the shutdown request.
    pub fn shutdown(&self, reason: impl Into<String>) {
        if !self.is_closed() {
            let _ = self.outbound.send(EngineRequest::Shutdown);
        }
        self.close(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.shared.lock().closed.clone()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_writer(
    mut writer: FrameWriter,
    mut outbound_rx: mpsc::UnboundedReceiver<EngineRequest>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;

            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    break;
                };
                let is_shutdown = matches!(request, EngineRequest::Shutdown);
                if let Err(e) = writer.send(request).await {
                    tracing::error!(error = %e, "Failed to write frame");
                    shared.close(format!("write failed: {e}"));
                    break;
                }
                if is_shutdown {
                    tracing::debug!("Shutdown request written");
                    break;
                }
            }

            _ = shared.shutdown.cancelled() => {
                break;
            }
        }
    }

    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "Error closing engine writer");
    }
    tracing::debug!("Writer task exiting");
}

async fn run_reader(mut reader: FrameReader, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.cancelled() => {
                break;
            }

            frame = reader.next() => {
                match frame {
                    Some(Ok(EngineReply::Result { token, payload })) => {
                        tracing::trace!(%token, "Result received");
                        shared.emit(ChannelEvent::Reply {
                            token,
                            outcome: ReplyOutcome::Completed(payload),
                        });
                    }
                    Some(Ok(EngineReply::Error { token, message })) => {
                        tracing::debug!(%token, %message, "Engine reported failure");
                        shared.emit(ChannelEvent::Reply {
                            token,
                            outcome: ReplyOutcome::Failed(message),
                        });
                    }
                    Some(Ok(EngineReply::Log { level, message })) => {
                        emit_engine_log(&level, &message);
                    }
                    Some(Ok(EngineReply::Ready { .. })) => {
                        tracing::warn!("Unexpected Ready after handshake");
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Engine channel error");
                        shared.close(format!("read failed: {e}"));
                        break;
                    }
                    None => {
                        tracing::warn!("Engine closed the connection");
                        shared.close("engine closed the connection".to_string());
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("Reader task exiting");
}

/// Wait for the engine's Ready. Log frames are re-emitted; stray replies are
/// ignored.
pub(crate) async fn await_ready(
    reader: &mut FrameReader,
    timeout: Duration,
) -> Result<(String, Option<String>)> {
    let ready = tokio::time::timeout(timeout, async {
        loop {
            match reader.next().await {
                Some(Ok(EngineReply::Ready { engine, version })) => return Ok((engine, version)),
                Some(Ok(EngineReply::Log { level, message })) => emit_engine_log(&level, &message),
                Some(Ok(other)) => {
                    tracing::warn!(?other, "Unexpected message during startup");
                }
                Some(Err(e)) => {
                    return Err(BridgeError::Startup(format!("engine channel error: {e}")));
                }
                None => {
                    return Err(BridgeError::Startup(
                        "engine closed the connection before becoming ready".to_string(),
                    ));
                }
            }
        }
    })
    .await;

    ready.unwrap_or(Err(BridgeError::StartupTimeout))
}

fn emit_engine_log(level: &str, message: &str) {
    for line in message.lines() {
        match level {
            "error" => tracing::error!(target: "kernelink::engine", "{}", line),
            "warn" | "warning" => tracing::warn!(target: "kernelink::engine", "{}", line),
            "debug" => tracing::debug!(target: "kernelink::engine", "{}", line),
            "trace" => tracing::trace!(target: "kernelink::engine", "{}", line),
            _ => tracing::info!(target: "kernelink::engine", "{}", line),
        }
    }
}
