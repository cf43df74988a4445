//! Session: one engine connection with its reference table and dispatcher.
//!
//! A [`Session`] is a cheap cloneable handle. Proxies keep a clone; the
//! connection lives until [`Session::shutdown`] or until the engine goes
//! away, whichever comes first.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::SinkExt;
use tokio::process::Child;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::channel::{Channel, await_ready};
use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::EngineRequest;
use crate::bridge::transport::EngineIo;
use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, PendingReply};
use crate::error::{BridgeError, Result};
use crate::proxy::{ASSIGN_TARGET, PendingObject, RemoteObject};
use crate::reference::{RefKind, ReferenceTable, RemoteReference};
use crate::render::{Bindings, Command, Renderer, Template};
use crate::resolution::Resolution;
use crate::version::{KERNELINK_VERSION, VersionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionInner {
    id: SessionId,
    refs: Arc<ReferenceTable>,
    renderer: Renderer,
    dispatcher: Dispatcher,
    version: VersionInfo,
    connected_at: DateTime<Utc>,
    child: tokio::sync::Mutex<Option<Child>>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Reach the configured engine and complete the handshake.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let connector = config
            .connector
            .as_ref()
            .ok_or_else(|| BridgeError::Startup("no engine endpoint configured".to_string()))?;

        tracing::info!(endpoint = %connector.describe(), "Opening engine session");
        let io = connector.connect().await?;
        Self::connect(io, config).await
    }

    /// Handshake over an existing connection: send `init`, wait for `ready`.
    pub async fn connect(io: EngineIo, config: &SessionConfig) -> Result<Self> {
        let (reader, writer, child) = io.into_parts();
        let mut reader = FramedRead::new(reader, JsonCodec::new());
        let mut writer = FramedWrite::new(writer, JsonCodec::new());

        writer
            .send(EngineRequest::Init {
                client: config.client_name.clone(),
                version: KERNELINK_VERSION.to_string(),
            })
            .await
            .map_err(|e| BridgeError::Startup(format!("failed to send init: {e}")))?;

        let (engine, engine_version) = await_ready(&mut reader, config.startup_timeout).await?;

        let refs = Arc::new(ReferenceTable::new());
        let channel = Arc::new(Channel::new(reader, writer));
        let dispatcher = Dispatcher::new(channel, Arc::clone(&refs))?;

        let id = SessionId::new();
        tracing::info!(
            session = %id,
            engine = %engine,
            engine_version = engine_version.as_deref().unwrap_or("unknown"),
            "Engine ready"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                refs,
                renderer: Renderer::new(Arc::clone(&config.syntax)),
                dispatcher,
                version: VersionInfo::new()
                    .with_engine(engine)
                    .with_engine_version(engine_version),
                connected_at: Utc::now(),
                child: tokio::sync::Mutex::new(child),
                shutdown_timeout: config.shutdown_timeout,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn version(&self) -> &VersionInfo {
        &self.inner.version
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.inner.refs
    }

    pub fn render(&self, template: &Template, bindings: &Bindings) -> Result<Command> {
        self.inner.renderer.render(template, bindings, &self.inner.refs)
    }

    /// Render and send. Rendering errors are returned here; everything after
    /// the command reaches the channel arrives through the reply.
    pub fn submit<T>(
        &self,
        template: &Template,
        bindings: &Bindings,
        resolution: Resolution,
    ) -> Result<PendingReply<T>> {
        let command = match self.render(template, bindings) {
            Ok(command) => command,
            Err(e) => {
                resolution.abandon(&self.inner.refs);
                return Err(e);
            }
        };
        self.submit_command(command, resolution)
    }

    pub fn submit_command<T>(&self, command: Command, resolution: Resolution) -> Result<PendingReply<T>> {
        self.inner.dispatcher.submit(command, resolution)
    }

    /// Submit a command that stores its result in a freshly minted
    /// reference, bound as `{{refId}}`, and wrap the result in `P`.
    pub fn assign<P: RemoteObject>(
        &self,
        template: &Template,
        mut bindings: Bindings,
    ) -> Result<PendingObject<P>> {
        if !template.has_placeholder(ASSIGN_TARGET) {
            return Err(BridgeError::MalformedTemplate {
                offset: 0,
                reason: format!("assignment template has no {{{{{ASSIGN_TARGET}}}}} placeholder"),
            });
        }

        let target = self.inner.refs.register(P::KIND);
        bindings.insert(ASSIGN_TARGET, &target);
        let reply = self.submit(template, &bindings, Resolution::Assign(target))?;
        Ok(PendingObject::new(self.clone(), reply))
    }

    /// Submit a command whose reply names a new engine-side object.
    pub fn create<P: RemoteObject>(
        &self,
        template: &Template,
        bindings: &Bindings,
    ) -> Result<PendingObject<P>> {
        let reply = self.submit(template, bindings, Resolution::NewReference(RefKind::new(P::KIND)))?;
        Ok(PendingObject::new(self.clone(), reply))
    }

    pub fn register(&self, kind: impl Into<RefKind>) -> RemoteReference {
        self.inner.refs.register(kind)
    }

    /// Forget a reference locally. The engine-side object is left alone.
    pub fn dispose(&self, reference: &RemoteReference) -> Result<()> {
        self.inner.refs.dispose(reference)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.dispatcher.is_closed()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    /// Fail pending requests, ask the engine to exit, release every
    /// reference and reap a spawned engine. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(session = %self.inner.id, "Shutting down session");
        self.inner.dispatcher.shutdown("session shut down");
        self.inner.refs.clear();

        let Some(mut child) = self.inner.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.inner.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "Engine process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for engine process");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
                    "Engine did not exit in time, killing it"
                );
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version)
            .field("connected_at", &self.inner.connected_at.to_rfc3339())
            .finish_non_exhaustive()
    }
}
