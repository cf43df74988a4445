//! Local stand-ins for engine-side objects.
//!
//! A proxy is a typed wrapper around one [`RemoteReference`] plus the
//! session it lives in. Methods on a proxy render a template against its
//! reference and forward it; they never reproduce engine behavior.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::dispatcher::PendingReply;
use crate::error::Result;
use crate::reference::RemoteReference;
use crate::session::Session;

/// Placeholder an assignment template writes its new reference into.
pub const ASSIGN_TARGET: &str = "refId";

/// Placeholder conventionally bound to the receiving proxy's reference.
pub const RECEIVER: &str = "inRefId";

pub trait RemoteObject: Sized {
    /// Engine-side type name; also prefixes generated variable names.
    const KIND: &'static str;

    fn from_reference(session: Session, reference: RemoteReference) -> Self;

    fn reference(&self) -> &RemoteReference;

    fn session(&self) -> &Session;
}

/// A [`PendingReply`] that wraps its reference in a proxy on success.
#[must_use = "a pending object does nothing unless awaited"]
pub struct PendingObject<P> {
    session: Session,
    reply: PendingReply<RemoteReference>,
    _marker: PhantomData<fn() -> P>,
}

impl<P> PendingObject<P> {
    pub fn new(session: Session, reply: PendingReply<RemoteReference>) -> Self {
        Self {
            session,
            reply,
            _marker: PhantomData,
        }
    }
}

impl<P: RemoteObject> Future for PendingObject<P> {
    type Output = Result<P>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.reply)
            .poll(cx)
            .map(|result| result.map(|reference| P::from_reference(this.session.clone(), reference)))
    }
}

impl<P> std::fmt::Debug for PendingObject<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingObject")
            .field("token", &self.reply.token())
            .finish_non_exhaustive()
    }
}
