//! Request dispatcher.
//!
//! Owns the pending-request table. Each submitted command gets a correlation
//! token and a oneshot; the channel's single handler routes replies back by
//! token. Every request ends in exactly one terminal state: fulfilled, failed
//! by the engine, or failed because the channel closed.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::bridge::channel::{Channel, ChannelEvent};
use crate::bridge::protocol::{CorrelationToken, ReplyOutcome};
use crate::error::{BridgeError, Result};
use crate::reference::ReferenceTable;
use crate::render::Command;
use crate::resolution::{Resolution, Resolved};

struct PendingRequest {
    resolution: Resolution,
    reply: oneshot::Sender<Result<Resolved>>,
    submitted_at: Instant,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<CorrelationToken, PendingRequest>,
    closed: Option<String>,
}

type SharedTable = Arc<StdMutex<PendingTable>>;

fn lock(table: &StdMutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Pending table mutex poisoned - recovering");
            poisoned.into_inner()
        }
    }
}

pub struct Dispatcher {
    channel: Arc<Channel>,
    refs: Arc<ReferenceTable>,
    table: SharedTable,
}

impl Dispatcher {
    /// Take over the channel's message handler.
    pub fn new(channel: Arc<Channel>, refs: Arc<ReferenceTable>) -> Result<Self> {
        let table: SharedTable = Arc::default();

        let handler_table = Arc::clone(&table);
        let handler_refs = Arc::clone(&refs);
        channel.on_message(move |event| match event {
            ChannelEvent::Reply { token, outcome } => {
                deliver(&handler_table, &handler_refs, token, outcome);
            }
            ChannelEvent::Closed { reason } => {
                fail_all(&handler_table, &handler_refs, &reason);
            }
        })?;

        Ok(Self {
            channel,
            refs,
            table,
        })
    }

    /// Send a rendered command and return the future for its reply.
    ///
    /// Fails immediately (without sending) once the channel has closed.
    pub fn submit<T>(&self, command: Command, resolution: Resolution) -> Result<PendingReply<T>> {
        // Hold the table while sending so the reply cannot arrive before the
        // entry exists.
        let mut table = lock(&self.table);
        if let Some(reason) = &table.closed {
            let err = BridgeError::channel_closed(reason.clone());
            drop(table);
            resolution.abandon(&self.refs);
            return Err(err);
        }

        let token = match self.channel.send(command) {
            Ok(token) => token,
            Err(e) => {
                drop(table);
                resolution.abandon(&self.refs);
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        tracing::debug!(%token, %resolution, "Submitted command");
        table.requests.insert(
            token,
            PendingRequest {
                resolution,
                reply: tx,
                submitted_at: Instant::now(),
            },
        );

        Ok(PendingReply {
            token,
            rx,
            refs: Arc::clone(&self.refs),
            _marker: PhantomData,
        })
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.table).requests.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.table).closed.is_some()
    }

    /// Fail everything in flight and drop the connection.
    pub fn close(&self, reason: &str) {
        fail_all(&self.table, &self.refs, reason);
        self.channel.close(reason);
    }

    /// Like [`close`](Self::close), but first asks the engine to exit.
    pub fn shutdown(&self, reason: &str) {
        fail_all(&self.table, &self.refs, reason);
        self.channel.shutdown(reason);
    }
}

fn deliver(table: &StdMutex<PendingTable>, refs: &ReferenceTable, token: CorrelationToken, outcome: ReplyOutcome) {
    let Some(request) = lock(table).requests.remove(&token) else {
        tracing::debug!(%token, "Ignoring reply for unknown or completed request");
        return;
    };

    let result = request.resolution.resolve(outcome, refs);
    tracing::debug!(
        %token,
        ok = result.is_ok(),
        elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Err(Ok(Resolved::Reference(orphan))) = request.reply.send(result) {
        // Caller gave up; nobody else can reach this reference.
        tracing::debug!(%token, reference = %orphan, "Disposing reference for abandoned request");
        let _ = refs.dispose(&orphan);
    }
}

fn fail_all(table: &StdMutex<PendingTable>, refs: &ReferenceTable, reason: &str) {
    let drained: Vec<_> = {
        let mut table = lock(table);
        if table.closed.is_some() {
            return;
        }
        table.closed = Some(reason.to_string());
        table.requests.drain().collect()
    };

    if !drained.is_empty() {
        tracing::warn!(count = drained.len(), %reason, "Failing pending requests");
    }
    for (_, request) in drained {
        request.resolution.abandon(refs);
        let _ = request.reply.send(Err(BridgeError::channel_closed(reason)));
    }
}

/// The eventual outcome of one submitted command.
///
/// Resolves exactly once, to the converted value or the request's error.
/// Dropping it does not cancel the command. A reference the caller cannot
/// receive (wrong `T`) is disposed.
#[must_use = "a pending reply does nothing unless awaited"]
pub struct PendingReply<T> {
    token: CorrelationToken,
    rx: oneshot::Receiver<Result<Resolved>>,
    refs: Arc<ReferenceTable>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PendingReply<T> {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }
}

impl<T> Future for PendingReply<T>
where
    T: TryFrom<Resolved, Error = BridgeError>,
{
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(Resolved::Reference(reference)))) => {
                let result = T::try_from(Resolved::Reference(reference.clone()));
                if result.is_err() {
                    tracing::debug!(token = %self.token, %reference, "Disposing reference of mistyped reply");
                    let _ = self.refs.dispose(&reference);
                }
                Poll::Ready(result)
            }
            Poll::Ready(Ok(result)) => Poll::Ready(result.and_then(T::try_from)),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(BridgeError::channel_closed("dispatcher dropped")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for PendingReply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::codec::JsonCodec;
    use crate::reference::RemoteReference;
    use crate::testing::FakeEngine;
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn dispatcher() -> (Dispatcher, Arc<ReferenceTable>, FakeEngine) {
        let (io, engine) = FakeEngine::pair();
        let (reader, writer, _) = io.into_parts();
        let channel = Arc::new(Channel::new(
            FramedRead::new(reader, JsonCodec::new()),
            FramedWrite::new(writer, JsonCodec::new()),
        ));
        let refs = Arc::new(ReferenceTable::new());
        let dispatcher = Dispatcher::new(channel, Arc::clone(&refs)).unwrap();
        (dispatcher, refs, engine)
    }

    #[tokio::test]
    async fn float_reply_resolves_prediction() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let reply = dispatcher
            .submit::<f64>(Command::raw("var r1 = x.predict(3.5);"), Resolution::Float)
            .unwrap();

        let (token, code) = engine.next_execute().await;
        assert_eq!(code, "var r1 = x.predict(3.5);");
        assert_eq!(token, reply.token());
        engine.reply(token, Some("2.75")).await;

        assert_eq!(reply.await.unwrap(), 2.75);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn empty_ack_resolves_void() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let reply = dispatcher
            .submit::<()>(Command::raw("m.save(sc, \"/tmp/m\");"), Resolution::Void)
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, None).await;

        reply.await.unwrap();
    }

    #[tokio::test]
    async fn handle_reply_registers_new_reference() {
        let (dispatcher, refs, mut engine) = dispatcher();
        let existing = refs.register("Model");

        let reply = dispatcher
            .submit::<RemoteReference>(Command::raw("load();"), Resolution::NewReference("Model".into()))
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, Some("model_h9")).await;

        let created = reply.await.unwrap();
        assert_ne!(created, existing);
        assert_eq!(refs.placeholder_for(&created).unwrap(), "model_h9");
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_own_requests() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let replies: Vec<_> = (0..8)
            .map(|i| {
                dispatcher
                    .submit::<i64>(Command::raw(format!("f({i});")), Resolution::Integer)
                    .unwrap()
            })
            .collect();

        let mut tokens = Vec::new();
        for i in 0..8 {
            let (token, code) = engine.next_execute().await;
            assert_eq!(code, format!("f({i});"));
            tokens.push(token);
        }
        for (i, token) in tokens.iter().enumerate().rev() {
            engine.reply(*token, Some(&(i * 10).to_string())).await;
        }

        let results = futures::future::join_all(replies).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), (i * 10) as i64);
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_and_unknown_replies_are_ignored() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let first = dispatcher
            .submit::<String>(Command::raw("a;"), Resolution::Text)
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, Some("once")).await;
        engine.reply(token, Some("twice")).await;
        engine.reply(CorrelationToken::new(9_999), Some("stray")).await;
        assert_eq!(first.await.unwrap(), "once");

        let second = dispatcher
            .submit::<String>(Command::raw("b;"), Resolution::Text)
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, Some("still fine")).await;
        assert_eq!(second.await.unwrap(), "still fine");
    }

    #[tokio::test]
    async fn engine_error_fails_only_its_request() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let bad = dispatcher
            .submit::<f64>(Command::raw("bad();"), Resolution::Float)
            .unwrap();
        let good = dispatcher
            .submit::<f64>(Command::raw("good();"), Resolution::Float)
            .unwrap();
        let (t_bad, _) = engine.next_execute().await;
        let (t_good, _) = engine.next_execute().await;

        engine.fail(t_bad, "TypeError: bad is not a function").await;
        engine.reply(t_good, Some("1.5")).await;

        assert!(matches!(
            bad.await,
            Err(BridgeError::RemoteExecution { message }) if message.starts_with("TypeError")
        ));
        assert_eq!(good.await.unwrap(), 1.5);
        assert!(!dispatcher.is_closed());
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_request() {
        let (dispatcher, refs, mut engine) = dispatcher();
        let target = refs.register("Rdd");

        let a = dispatcher.submit::<f64>(Command::raw("a;"), Resolution::Float).unwrap();
        let b = dispatcher.submit::<()>(Command::raw("b;"), Resolution::Void).unwrap();
        let c = dispatcher
            .submit::<RemoteReference>(Command::raw("c;"), Resolution::Assign(target.clone()))
            .unwrap();
        for _ in 0..3 {
            engine.next_execute().await;
        }
        drop(engine);

        assert!(a.await.unwrap_err().is_channel_closed());
        assert!(b.await.unwrap_err().is_channel_closed());
        assert!(c.await.unwrap_err().is_channel_closed());
        assert!(!refs.is_live(&target));
        assert!(dispatcher.is_closed());

        let err = dispatcher
            .submit::<f64>(Command::raw("late;"), Resolution::Float)
            .unwrap_err();
        assert!(err.is_channel_closed());
    }

    #[tokio::test]
    async fn failed_assignment_disposes_target() {
        let (dispatcher, refs, mut engine) = dispatcher();
        let target = refs.register("Rdd");

        let reply = dispatcher
            .submit::<RemoteReference>(Command::raw("var Rdd_1 = oops();"), Resolution::Assign(target.clone()))
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.fail(token, "ReferenceError: oops is not defined").await;

        assert!(matches!(reply.await, Err(BridgeError::RemoteExecution { .. })));
        assert!(!refs.is_live(&target));
    }

    #[tokio::test]
    async fn dropped_reply_disposes_created_reference() {
        let (dispatcher, refs, mut engine) = dispatcher();

        let abandoned = dispatcher
            .submit::<RemoteReference>(Command::raw("mk();"), Resolution::NewReference("Model".into()))
            .unwrap();
        drop(abandoned);
        let (token, _) = engine.next_execute().await;
        engine.reply(token, Some("h1")).await;

        // Replies are handled in order, so once this resolves the first is done.
        let marker = dispatcher.submit::<()>(Command::raw("noop;"), Resolution::Void).unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, None).await;
        marker.await.unwrap();

        assert_eq!(refs.live_count(), 0);
    }

    #[tokio::test]
    async fn mistyped_reply_disposes_created_reference() {
        let (dispatcher, refs, mut engine) = dispatcher();

        let reply = dispatcher
            .submit::<f64>(Command::raw("mk();"), Resolution::NewReference("Model".into()))
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, Some("h1")).await;

        let err = reply.await.unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedReply(msg) if msg.contains("reference")));
        assert_eq!(refs.live_count(), 0);
    }

    #[tokio::test]
    async fn mistyped_assignment_disposes_target() {
        let (dispatcher, refs, mut engine) = dispatcher();
        let target = refs.register("Rdd");

        let reply = dispatcher
            .submit::<String>(Command::raw("var Rdd_1 = f();"), Resolution::Assign(target.clone()))
            .unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, None).await;

        assert!(matches!(reply.await, Err(BridgeError::UnexpectedReply(_))));
        assert!(!refs.is_live(&target));
    }

    #[tokio::test]
    async fn explicit_close_is_idempotent() {
        let (dispatcher, _refs, mut engine) = dispatcher();

        let pending = dispatcher.submit::<f64>(Command::raw("a;"), Resolution::Float).unwrap();
        engine.next_execute().await;

        dispatcher.close("client closing");
        dispatcher.close("again");

        match pending.await {
            Err(BridgeError::ChannelClosed { reason }) => assert_eq!(reason, "client closing"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
