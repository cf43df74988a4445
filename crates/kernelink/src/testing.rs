//! In-process fake engine for tests.
//!
//! Speaks the wire protocol over a `tokio::io::duplex` pipe so tests can
//! script replies (out of order, duplicated, failed) without a real engine.

use futures::{SinkExt, StreamExt};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{CorrelationToken, EngineReply, EngineRequest};
use crate::bridge::transport::EngineIo;
use crate::config::SessionConfig;
use crate::session::Session;

const PIPE_CAPACITY: usize = 64 * 1024;

pub struct FakeEngine {
    requests: FramedRead<ReadHalf<DuplexStream>, JsonCodec<EngineRequest>>,
    replies: FramedWrite<WriteHalf<DuplexStream>, JsonCodec<EngineReply>>,
}

impl FakeEngine {
    /// Client-side IO plus the engine end of the pipe.
    pub fn pair() -> (EngineIo, FakeEngine) {
        let (client, engine) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, client_write) = tokio::io::split(client);
        let (engine_read, engine_write) = tokio::io::split(engine);

        let fake = FakeEngine {
            requests: FramedRead::new(engine_read, JsonCodec::new()),
            replies: FramedWrite::new(engine_write, JsonCodec::new()),
        };
        (EngineIo::new(client_read, client_write), fake)
    }

    /// Expect Init and answer Ready.
    pub async fn accept(&mut self) {
        match self.next_request().await {
            Some(EngineRequest::Init { .. }) => {}
            other => panic!("expected Init, got {other:?}"),
        }
        self.send(EngineReply::Ready {
            engine: "fake-engine".to_string(),
            version: Some("1.0.0".to_string()),
        })
        .await;
    }

    /// Next request, or `None` once the client closed its end.
    pub async fn next_request(&mut self) -> Option<EngineRequest> {
        match self.requests.next().await {
            Some(Ok(request)) => Some(request),
            Some(Err(e)) => panic!("fake engine decode error: {e}"),
            None => None,
        }
    }

    pub async fn next_execute(&mut self) -> (CorrelationToken, String) {
        match self.next_request().await {
            Some(EngineRequest::Execute { token, code }) => (token, code),
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    pub async fn reply(&mut self, token: CorrelationToken, payload: Option<&str>) {
        self.send(EngineReply::Result {
            token,
            payload: payload.map(str::to_string),
        })
        .await;
    }

    pub async fn fail(&mut self, token: CorrelationToken, message: &str) {
        self.send(EngineReply::Error {
            token,
            message: message.to_string(),
        })
        .await;
    }

    pub async fn send(&mut self, reply: EngineReply) {
        if let Err(e) = self.try_send(reply).await {
            panic!("fake engine write error: {e}");
        }
    }

    /// Like [`send`](Self::send), but reports a closed client instead of
    /// panicking.
    pub async fn try_send(&mut self, reply: EngineReply) -> std::io::Result<()> {
        self.replies.send(reply).await
    }
}

/// A session connected to a fresh fake engine.
pub async fn connected_session() -> (Session, FakeEngine) {
    let (io, mut engine) = FakeEngine::pair();
    let config = SessionConfig::default();
    let (session, ()) = tokio::join!(Session::connect(io, &config), engine.accept());
    match session {
        Ok(session) => (session, engine),
        Err(e) => panic!("fake session failed to connect: {e}"),
    }
}
