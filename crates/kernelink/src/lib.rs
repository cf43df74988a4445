//! kernelink: remote reference and command bridge for objects that live in
//! an external compute engine.

mod error;
mod version;

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod proxy;
pub mod reference;
pub mod render;
pub mod resolution;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::transport::{EngineConnector, EngineEndpoint, EngineIo, SpawnError};
pub use config::{ConfigError, SessionConfig};
pub use dispatcher::PendingReply;
pub use error::{BridgeError, Result};
pub use proxy::{ASSIGN_TARGET, PendingObject, RECEIVER, RemoteObject};
pub use reference::{RefId, RefKind, ReferenceTable, RemoteReference};
pub use render::{Bindable, Bindings, Command, Literal, LiteralSyntax, Renderer, ScriptSyntax, Template};
pub use resolution::{Resolution, Resolved};
pub use session::{Session, SessionId};
pub use version::{KERNELINK_VERSION, VersionInfo};
