//! kernelink-mllib: proxies for machine learning objects living in the engine.
//!
//! Every method renders a command against the proxy's reference and hands
//! it to the owning [`Session`](kernelink::Session). Nothing is computed
//! locally.

macro_rules! remote_object {
    ($ty:ident, $kind:literal) => {
        impl kernelink::RemoteObject for $ty {
            const KIND: &'static str = $kind;

            fn from_reference(
                session: kernelink::Session,
                reference: kernelink::RemoteReference,
            ) -> Self {
                Self { session, reference }
            }

            fn reference(&self) -> &kernelink::RemoteReference {
                &self.reference
            }

            fn session(&self) -> &kernelink::Session {
                &self.session
            }
        }

        impl From<&$ty> for kernelink::Bindable {
            fn from(proxy: &$ty) -> Self {
                kernelink::Bindable::from(&proxy.reference)
            }
        }
    };
}

pub(crate) use remote_object;

pub mod context;
pub mod rdd;
pub mod regression;

pub use context::SparkContext;
pub use rdd::{FloatRdd, Rdd};
pub use regression::IsotonicRegressionModel;
