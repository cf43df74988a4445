//! Wire protocol types for client-engine communication.
//!
//! One duplex connection carries everything:
//! - **client → engine**: Init (first message), Execute, Shutdown
//! - **engine → client**: Ready (answer to Init), Result / Error (correlated by
//!   token), Log (uncorrelated engine output)
//!
//! Replies may arrive in any order; the token is the only correlation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one submitted command and its eventual reply.
///
/// Minted by the channel from a per-connection monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages from client to engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    /// Sent immediately after connecting (must be first message).
    Init { client: String, version: String },

    /// Run one rendered command.
    Execute { token: CorrelationToken, code: String },

    Shutdown,
}

/// Messages from engine to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineReply {
    Ready {
        engine: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Command completed. `payload` is the textual value of the command's
    /// result, absent for statements without a value.
    Result {
        token: CorrelationToken,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
    },

    /// Command failed inside the engine.
    Error {
        token: CorrelationToken,
        message: String,
    },

    /// Engine-side output not tied to a command.
    Log { level: String, message: String },
}

/// Terminal outcome of one command as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Completed(Option<String>),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_serializes() {
        let req = EngineRequest::Init {
            client: "kernelink".to_string(),
            version: "0.3.0".to_string(),
        };
        insta::assert_json_snapshot!(req, @r#"
        {
          "type": "init",
          "client": "kernelink",
          "version": "0.3.0"
        }
        "#);
    }

    #[test]
    fn execute_serializes() {
        let req = EngineRequest::Execute {
            token: CorrelationToken::new(7),
            code: "var r1 = x.predict(3.5);".to_string(),
        };
        insta::assert_json_snapshot!(req, @r#"
        {
          "type": "execute",
          "token": 7,
          "code": "var r1 = x.predict(3.5);"
        }
        "#);
    }

    #[test]
    fn shutdown_serializes() {
        insta::assert_json_snapshot!(EngineRequest::Shutdown, @r#"
        {
          "type": "shutdown"
        }
        "#);
    }

    #[test]
    fn result_without_payload_omits_field() {
        let reply = EngineReply::Result {
            token: CorrelationToken::new(3),
            payload: None,
        };
        insta::assert_json_snapshot!(reply, @r#"
        {
          "type": "result",
          "token": 3
        }
        "#);
    }

    #[test]
    fn error_serializes() {
        let reply = EngineReply::Error {
            token: CorrelationToken::new(9),
            message: "TypeError: x is undefined".to_string(),
        };
        insta::assert_json_snapshot!(reply, @r#"
        {
          "type": "error",
          "token": 9,
          "message": "TypeError: x is undefined"
        }
        "#);
    }

    #[test]
    fn ready_deserializes_without_version() {
        let reply: EngineReply = serde_json::from_str(r#"{"type":"ready","engine":"nashorn"}"#).unwrap();
        assert_eq!(
            reply,
            EngineReply::Ready {
                engine: "nashorn".to_string(),
                version: None
            }
        );
    }

    #[test]
    fn result_deserializes_payload() {
        let reply: EngineReply =
            serde_json::from_str(r#"{"type":"result","token":1,"payload":"2.75"}"#).unwrap();
        assert_eq!(
            reply,
            EngineReply::Result {
                token: CorrelationToken::new(1),
                payload: Some("2.75".to_string())
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<EngineReply>(r#"{"type":"bogus"}"#).is_err());
    }
}
