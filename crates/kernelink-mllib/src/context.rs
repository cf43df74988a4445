use kernelink::{
    Bindable, Bindings, PendingObject, PendingReply, RECEIVER, RemoteReference, Resolution, Result,
    Session, Template,
};

use crate::rdd::{FloatRdd, Rdd};

const NEW_CONTEXT: &str = "var {{refId}} = new SparkContext({{master}},{{name}});";
const PARALLELIZE: &str = "var {{refId}} = {{inRefId}}.parallelize({{data}});";
const PARALLELIZE_DOUBLES: &str = "var {{refId}} = {{inRefId}}.parallelizeDoubles({{data}});";
const STOP: &str = "{{inRefId}}.stop();";

/// Entry point to the engine's cluster; creates datasets.
#[derive(Debug, Clone)]
pub struct SparkContext {
    session: Session,
    reference: RemoteReference,
}

crate::remote_object!(SparkContext, "SparkContext");

impl SparkContext {
    pub fn new(session: &Session, master: &str, app_name: &str) -> Result<PendingObject<Self>> {
        tracing::debug!(%master, %app_name, "Creating context");
        let bindings = Bindings::new().bind("master", master).bind("name", app_name);
        session.assign(&Template::parse(NEW_CONTEXT)?, bindings)
    }

    /// Distribute local values as an [`Rdd`].
    pub fn parallelize<T: Into<Bindable>>(&self, data: Vec<T>) -> Result<PendingObject<Rdd>> {
        tracing::debug!(context = %self.reference, len = data.len(), "Parallelizing values");
        let bindings = Bindings::new().bind(RECEIVER, self).bind("data", data);
        self.session.assign(&Template::parse(PARALLELIZE)?, bindings)
    }

    pub fn parallelize_doubles(&self, data: Vec<f64>) -> Result<PendingObject<FloatRdd>> {
        tracing::debug!(context = %self.reference, len = data.len(), "Parallelizing doubles");
        let bindings = Bindings::new().bind(RECEIVER, self).bind("data", data);
        self.session.assign(&Template::parse(PARALLELIZE_DOUBLES)?, bindings)
    }

    pub fn stop(&self) -> Result<PendingReply<()>> {
        let bindings = Bindings::new().bind(RECEIVER, self);
        self.session.submit(&Template::parse(STOP)?, &bindings, Resolution::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelink::RemoteObject;
    use kernelink::testing::connected_session;

    #[tokio::test]
    async fn creates_context_and_datasets() {
        let (session, mut engine) = connected_session().await;

        let pending = SparkContext::new(&session, "local[*]", "isotonic").unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @r#"var SparkContext_1 = new SparkContext("local[*]","isotonic");"#);
        engine.reply(token, None).await;
        let sc = pending.await.unwrap();

        let pending = sc.parallelize(vec!["a", "b"]).unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @r#"var Rdd_2 = SparkContext_1.parallelize(["a","b"]);"#);
        engine.reply(token, None).await;
        let rdd = pending.await.unwrap();
        assert_eq!(rdd.reference().kind().as_str(), "Rdd");

        let pending = sc.parallelize_doubles(vec![0.5, 1.5]).unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @"var FloatRdd_3 = SparkContext_1.parallelizeDoubles([0.5,1.5]);");
        engine.reply(token, None).await;
        pending.await.unwrap();

        let stopped = sc.stop().unwrap();
        let (token, code) = engine.next_execute().await;
        assert_eq!(code, "SparkContext_1.stop();");
        engine.reply(token, None).await;
        stopped.await.unwrap();
    }
}
