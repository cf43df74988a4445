//! Per-call resolution strategies.
//!
//! Each submitted command names how its raw reply becomes a value. Every
//! strategy maps a reply to exactly one `Result`, so a request can never be
//! left without an outcome.

use std::fmt;

use crate::bridge::protocol::ReplyOutcome;
use crate::error::{BridgeError, Result};
use crate::reference::{RefKind, ReferenceTable, RemoteReference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Parse the payload as a float.
    Float,
    /// Parse the payload as an integer.
    Integer,
    /// Return the payload text (empty when absent).
    Text,
    /// Parse the payload as JSON (null when absent).
    Json,
    /// Discard the payload; success carries no value.
    Void,
    /// The payload names a new engine-side handle; register it. The handle
    /// must be an engine identifier (`model_7`), not a bare number.
    NewReference(RefKind),
    /// The command assigned a reference minted before submission. A failed
    /// command disposes it.
    Assign(RemoteReference),
}

/// A reply after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Float(f64),
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
    Void,
    Reference(RemoteReference),
}

impl Resolved {
    fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Void => "void",
            Self::Reference(_) => "reference",
        }
    }

    fn mismatch(self, expected: &str) -> BridgeError {
        BridgeError::UnexpectedReply(format!("expected {expected}, resolved {}", self.kind()))
    }
}

impl Resolution {
    pub(crate) fn resolve(&self, outcome: ReplyOutcome, refs: &ReferenceTable) -> Result<Resolved> {
        let payload = match outcome {
            ReplyOutcome::Completed(payload) => payload,
            ReplyOutcome::Failed(message) => {
                self.abandon(refs);
                return Err(BridgeError::RemoteExecution { message });
            }
        };

        match self {
            Self::Float => {
                let text = require(payload, "a number")?;
                text.trim()
                    .parse::<f64>()
                    .map(Resolved::Float)
                    .map_err(|_| BridgeError::UnexpectedReply(format!("expected a number, got {text:?}")))
            }
            Self::Integer => {
                let text = require(payload, "an integer")?;
                parse_integer(text.trim())
                    .map(Resolved::Integer)
                    .ok_or_else(|| {
                        BridgeError::UnexpectedReply(format!("expected an integer, got {text:?}"))
                    })
            }
            Self::Text => Ok(Resolved::Text(payload.unwrap_or_default())),
            Self::Json => match payload.as_deref().map(str::trim) {
                None | Some("") => Ok(Resolved::Json(serde_json::Value::Null)),
                Some(text) => serde_json::from_str(text)
                    .map(Resolved::Json)
                    .map_err(|e| BridgeError::UnexpectedReply(format!("invalid JSON payload: {e}"))),
            },
            Self::Void => Ok(Resolved::Void),
            Self::NewReference(kind) => {
                let handle = require(payload, "an engine handle")?;
                refs.register_handle(kind.clone(), &handle)
                    .map(Resolved::Reference)
            }
            Self::Assign(reference) => {
                if refs.is_live(reference) {
                    Ok(Resolved::Reference(reference.clone()))
                } else {
                    Err(BridgeError::StaleReference { id: reference.id() })
                }
            }
        }
    }

    /// Release anything minted on behalf of a request that will not succeed.
    pub(crate) fn abandon(&self, refs: &ReferenceTable) {
        if let Self::Assign(reference) = self
            && refs.is_live(reference)
        {
            let _ = refs.dispose(reference);
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => f.write_str("float"),
            Self::Integer => f.write_str("integer"),
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
            Self::Void => f.write_str("void"),
            Self::NewReference(kind) => write!(f, "new {kind}"),
            Self::Assign(reference) => write!(f, "assign {reference}"),
        }
    }
}

fn require(payload: Option<String>, what: &str) -> Result<String> {
    payload.ok_or_else(|| BridgeError::UnexpectedReply(format!("expected {what}, got no payload")))
}

fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(i);
    }
    // Engines without an integer type print whole numbers as floats.
    let f = text.parse::<f64>().ok()?;
    (f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15).then_some(f as i64)
}

impl TryFrom<Resolved> for f64 {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Float(f) => Ok(f),
            Resolved::Integer(i) => Ok(i as f64),
            other => Err(other.mismatch("float")),
        }
    }
}

impl TryFrom<Resolved> for i64 {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Integer(i) => Ok(i),
            other => Err(other.mismatch("integer")),
        }
    }
}

impl TryFrom<Resolved> for String {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Text(s) => Ok(s),
            other => Err(other.mismatch("text")),
        }
    }
}

impl TryFrom<Resolved> for serde_json::Value {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Json(v) => Ok(v),
            other => Err(other.mismatch("json")),
        }
    }
}

impl TryFrom<Resolved> for () {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Void => Ok(()),
            other => Err(other.mismatch("void")),
        }
    }
}

impl TryFrom<Resolved> for RemoteReference {
    type Error = BridgeError;

    fn try_from(resolved: Resolved) -> Result<Self> {
        match resolved {
            Resolved::Reference(r) => Ok(r),
            other => Err(other.mismatch("reference")),
        }
    }
}
