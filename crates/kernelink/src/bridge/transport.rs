//! Engine endpoints.
//!
//! The engine is a separate process. We either spawn it and talk over its
//! stdin/stdout, or connect to one that is already running:
//! - **Spawn**: `program arg...` (stderr is inherited)
//! - **Unix**: filesystem socket (`unix:/path/to/engine.sock`)
//! - **Tcp**: `tcp:host:port`
//!
//! Any AsyncRead/AsyncWrite pair can be wrapped with [`EngineIo::new`].

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] io::Error),
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid engine endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Raw byte streams to the engine, plus the child process if we spawned it.
pub struct EngineIo {
    reader: BoxedReader,
    writer: BoxedWriter,
    child: Option<Child>,
}

impl EngineIo {
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            child: None,
        }
    }

    /// Take over a spawned child's stdin/stdout.
    pub fn from_child(mut child: Child) -> Result<Self, SpawnError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError::Other("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Other("stdout not captured".to_string()))?;

        Ok(Self {
            reader: Box::pin(stdout),
            writer: Box::pin(stdin),
            child: Some(child),
        })
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }
}

/// Extension point for different ways of reaching an engine.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> Result<EngineIo, SpawnError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    Spawn { program: String, args: Vec<String> },
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(String),
}

impl EngineEndpoint {
    pub fn spawn(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Spawn {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn connect_error(&self, source: io::Error) -> SpawnError {
        SpawnError::Connect {
            endpoint: self.to_string(),
            source,
        }
    }
}

impl FromStr for EngineEndpoint {
    type Err = SpawnError;

    /// `unix:<path>`, `tcp:<host:port>`, or a whitespace-separated command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(SpawnError::InvalidEndpoint(s.to_string()));
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(SpawnError::InvalidEndpoint(s.to_string()));
            }
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if addr.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(SpawnError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }

        let mut parts = s.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SpawnError::InvalidEndpoint(s.to_string()))?;
        Ok(Self::spawn(program, parts))
    }
}

impl fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, args } if args.is_empty() => write!(f, "{program}"),
            Self::Spawn { program, args } => write!(f, "{program} {}", args.join(" ")),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

#[async_trait]
impl EngineConnector for EngineEndpoint {
    async fn connect(&self) -> Result<EngineIo, SpawnError> {
        match self {
            Self::Spawn { program, args } => {
                tracing::info!(%program, ?args, "Spawning engine subprocess");
                let child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()?;
                EngineIo::from_child(child)
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                tracing::debug!(path = %path.display(), "Connecting to engine socket");
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|source| self.connect_error(source))?;
                let (read, write) = stream.into_split();
                Ok(EngineIo::new(read, write))
            }
            Self::Tcp(addr) => {
                tracing::debug!(%addr, "Connecting to engine over TCP");
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|source| self.connect_error(source))?;
                stream
                    .set_nodelay(true)
                    .map_err(|source| self.connect_error(source))?;
                let (read, write) = stream.into_split();
                Ok(EngineIo::new(read, write))
            }
        }
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}
