use kernelink::{
    Bindings, PendingObject, PendingReply, RECEIVER, RemoteObject, RemoteReference, Resolution, Result,
    Session, Template,
};

use crate::context::SparkContext;
use crate::rdd::{FloatRdd, Rdd};

const PREDICT_VALUE: &str = "{{inRefId}}.predict({{testData}});";
const PREDICT_ASSIGN: &str = "var {{refId}} = {{inRefId}}.predict({{testData}});";
const SAVE: &str = "{{inRefId}}.save({{sc}},{{path}});";
const LOAD: &str = "var {{refId}} = IsotonicRegressionModel.load({{sc}},{{path}});";

/// Isotonic regression model held by the engine.
///
/// Prediction is a piecewise linear function over the model's boundaries;
/// all of it runs engine-side.
#[derive(Debug, Clone)]
pub struct IsotonicRegressionModel {
    session: Session,
    reference: RemoteReference,
}

crate::remote_object!(IsotonicRegressionModel, "IsotonicRegressionModel");

impl IsotonicRegressionModel {
    /// Predict a single label.
    pub fn predict(&self, test_data: f64) -> Result<PendingReply<f64>> {
        tracing::debug!(model = %self.reference, test_data, "Predicting label");
        let bindings = Bindings::new()
            .bind(RECEIVER, self)
            .bind("testData", test_data);
        self.session
            .submit(&Template::parse(PREDICT_VALUE)?, &bindings, Resolution::Float)
    }

    /// Predict labels for every element of `test_data`.
    pub fn predict_rdd(&self, test_data: &Rdd) -> Result<PendingObject<Rdd>> {
        tracing::debug!(model = %self.reference, features = %test_data.reference(), "Predicting dataset");
        let bindings = Bindings::new()
            .bind(RECEIVER, self)
            .bind("testData", test_data);
        self.session.assign(&Template::parse(PREDICT_ASSIGN)?, bindings)
    }

    pub fn predict_float_rdd(&self, test_data: &FloatRdd) -> Result<PendingObject<FloatRdd>> {
        tracing::debug!(model = %self.reference, features = %test_data.reference(), "Predicting dataset");
        let bindings = Bindings::new()
            .bind(RECEIVER, self)
            .bind("testData", test_data);
        self.session.assign(&Template::parse(PREDICT_ASSIGN)?, bindings)
    }

    pub fn save(&self, sc: &SparkContext, path: &str) -> Result<PendingReply<()>> {
        tracing::debug!(model = %self.reference, %path, "Saving model");
        let bindings = Bindings::new()
            .bind(RECEIVER, self)
            .bind("sc", sc)
            .bind("path", path);
        self.session
            .submit(&Template::parse(SAVE)?, &bindings, Resolution::Void)
    }

    pub fn load(session: &Session, sc: &SparkContext, path: &str) -> Result<PendingObject<Self>> {
        tracing::debug!(%path, "Loading model");
        let bindings = Bindings::new().bind("sc", sc).bind("path", path);
        session.assign(&Template::parse(LOAD)?, bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelink::testing::{FakeEngine, connected_session};
    use kernelink::BridgeError;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    async fn setup() -> (Session, FakeEngine, SparkContext, IsotonicRegressionModel) {
        let (session, mut engine) = connected_session().await;

        let pending = SparkContext::new(&session, "local[*]", "isotonic").unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, None).await;
        let sc = pending.await.unwrap();

        let pending = IsotonicRegressionModel::load(&session, &sc, "/tmp/isotonic").unwrap();
        let (token, code) = engine.next_execute().await;
        insta::allow_duplicates! {
            insta::assert_snapshot!(
                code,
                @r#"var IsotonicRegressionModel_2 = IsotonicRegressionModel.load(SparkContext_1,"/tmp/isotonic");"#
            );
        }
        engine.reply(token, None).await;
        let model = pending.await.unwrap();

        (session, engine, sc, model)
    }

    #[tokio::test]
    async fn predict_single_value() {
        let (_session, mut engine, _sc, model) = setup().await;

        let label = model.predict(3.5).unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @"IsotonicRegressionModel_2.predict(3.5);");
        engine.reply(token, Some("2.75")).await;

        assert_eq!(label.await.unwrap(), 2.75);
    }

    #[tokio::test]
    async fn predict_emits_debug_event_for_model() {
        let (_session, _engine, _sc, model) = setup().await;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let pending = tracing::subscriber::with_default(subscriber, || model.predict(0.5));
        drop(pending);

        let text = logs.text();
        assert!(text.contains("Predicting label"), "{text}");
        assert!(text.contains(&format!("model={}", model.reference())), "{text}");
    }

    #[tokio::test]
    async fn predict_dataset_chains_proxies() {
        let (session, mut engine, sc, model) = setup().await;

        let pending = sc.parallelize_doubles(vec![0.5, 3.5]).unwrap();
        let (token, _) = engine.next_execute().await;
        engine.reply(token, None).await;
        let features = pending.await.unwrap();

        let pending = model.predict_float_rdd(&features).unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @"var FloatRdd_4 = IsotonicRegressionModel_2.predict(FloatRdd_3);");
        engine.reply(token, None).await;
        let labels = pending.await.unwrap();
        assert_ne!(labels.reference(), features.reference());
        assert!(session.references().is_live(labels.reference()));

        let mean = labels.mean().unwrap();
        let (token, code) = engine.next_execute().await;
        assert_eq!(code, "FloatRdd_4.mean();");
        engine.reply(token, Some("1.25")).await;
        assert_eq!(mean.await.unwrap(), 1.25);
    }

    #[tokio::test]
    async fn failed_prediction_releases_result_reference() {
        let (session, mut engine, _sc, model) = setup().await;
        let rdd = Rdd::from_reference(session.clone(), session.register(Rdd::KIND));
        let live_before = session.references().live_count();

        let pending = model.predict_rdd(&rdd).unwrap();
        let (token, code) = engine.next_execute().await;
        assert_eq!(code, "var Rdd_4 = IsotonicRegressionModel_2.predict(Rdd_3);");
        engine.fail(token, "Java exception: empty RDD").await;

        assert!(matches!(pending.await, Err(BridgeError::RemoteExecution { .. })));
        assert_eq!(session.references().live_count(), live_before);
    }

    #[tokio::test]
    async fn save_acknowledges_with_unit() {
        let (_session, mut engine, sc, model) = setup().await;

        let saved = model.save(&sc, "/tmp/isotonic-copy").unwrap();
        let (token, code) = engine.next_execute().await;
        insta::assert_snapshot!(code, @r#"IsotonicRegressionModel_2.save(SparkContext_1,"/tmp/isotonic-copy");"#);
        engine.reply(token, None).await;

        saved.await.unwrap();
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail_fast() {
        let (session, _engine, _sc, model) = setup().await;
        session.shutdown().await.unwrap();

        // References were released with the session.
        assert!(matches!(model.predict(1.0), Err(BridgeError::StaleReference { .. })));
    }
}
