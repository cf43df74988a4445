//! Distributed dataset handles.

use kernelink::{Bindings, PendingReply, RECEIVER, RemoteReference, Resolution, Result, Session, Template};

const COLLECT: &str = "JSON.stringify({{inRefId}}.collect());";
const COUNT: &str = "{{inRefId}}.count();";
const MEAN: &str = "{{inRefId}}.mean();";

#[derive(Debug, Clone)]
pub struct Rdd {
    session: Session,
    reference: RemoteReference,
}

crate::remote_object!(Rdd, "Rdd");

impl Rdd {
    /// All elements, as JSON.
    pub fn collect(&self) -> Result<PendingReply<serde_json::Value>> {
        submit(&self.session, self, COLLECT, Resolution::Json)
    }

    pub fn count(&self) -> Result<PendingReply<i64>> {
        submit(&self.session, self, COUNT, Resolution::Integer)
    }
}

/// A dataset of floats.
#[derive(Debug, Clone)]
pub struct FloatRdd {
    session: Session,
    reference: RemoteReference,
}

crate::remote_object!(FloatRdd, "FloatRdd");

impl FloatRdd {
    pub fn collect(&self) -> Result<PendingReply<serde_json::Value>> {
        submit(&self.session, self, COLLECT, Resolution::Json)
    }

    pub fn count(&self) -> Result<PendingReply<i64>> {
        submit(&self.session, self, COUNT, Resolution::Integer)
    }

    pub fn mean(&self) -> Result<PendingReply<f64>> {
        submit(&self.session, self, MEAN, Resolution::Float)
    }
}

fn submit<T>(
    session: &Session,
    receiver: impl Into<kernelink::Bindable>,
    template: &str,
    resolution: Resolution,
) -> Result<PendingReply<T>> {
    let bindings = Bindings::new().bind(RECEIVER, receiver);
    session.submit(&Template::parse(template)?, &bindings, resolution)
}
