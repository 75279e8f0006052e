use std::sync::Arc;

use probe::template::{self, Env};
use probe::{Engine, Monitor, MonitorResult, MonitorStatus};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::messages::{DispatchMessage, OndemandResponse, PostRequestEvent};
use crate::bus::{MessageBus, Topics, publish_json, spawn_handler};
use crate::ondemand::OndemandSink;
use crate::storage::Storage;

/// Executes dispatched monitors for a set of regions
pub struct Worker {
    engine: Arc<Engine>,
    storage: Arc<dyn Storage>,
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    ondemand: Arc<dyn OndemandSink>,
}

impl Worker {
    pub fn new(
        engine: Arc<Engine>,
        storage: Arc<dyn Storage>,
        bus: Arc<dyn MessageBus>,
        topics: Topics,
        ondemand: Arc<dyn OndemandSink>,
    ) -> Self {
        Self { engine, storage, bus, topics, ondemand }
    }

    /// Subscribe to the dispatch topic of every region.
    pub fn spawn(self: Arc<Self>, regions: &[String]) -> Vec<JoinHandle<()>> {
        regions
            .iter()
            .map(|region| {
                let subscription = self.bus.subscribe(&self.topics.dispatch(region));
                info!(region, topic = %subscription.topic(), "Worker listening");

                let worker = self.clone();
                spawn_handler(subscription, move |message: DispatchMessage| {
                    let worker = worker.clone();
                    async move {
                        worker.handle(message).await;
                    }
                })
            })
            .collect()
    }

    /// Flattened variables: account globals, then each named environment
    /// in order, then the monitor's own overrides.
    pub async fn environment(&self, monitor: &Monitor) -> Env {
        let mut layers = Vec::with_capacity(monitor.env_ids.len() + 2);

        match self.storage.global_environment(&monitor.account_id).await {
            Ok(globals) => layers.push(globals),
            Err(e) => warn!(monitor_id = %monitor.id, error = %e, "Failed to load global environment"),
        }

        for env_id in &monitor.env_ids {
            match self.storage.environment(&monitor.account_id, env_id).await {
                Ok(Some(variables)) => layers.push(variables),
                Ok(None) => warn!(monitor_id = %monitor.id, env_id, "Environment not found"),
                Err(e) => warn!(monitor_id = %monitor.id, env_id, error = %e, "Failed to load environment"),
            }
        }

        layers.push(monitor.variables.clone());
        template::merge_env(layers)
    }

    pub async fn handle(&self, message: DispatchMessage) -> MonitorResult {
        let DispatchMessage { run_id, location, monitor } = message;
        let env = self.environment(&monitor).await;
        let result = self.engine.run(&monitor, env, &location).await;

        if monitor.status == MonitorStatus::Ondemand {
            match run_id {
                Some(run_id) => {
                    self.ondemand.deliver(OndemandResponse { run_id, result: result.clone() }).await;
                }
                None => warn!(monitor_id = %monitor.id, "On-demand monitor dispatched without a run id"),
            }
            return result;
        }

        let Some(saved) = self.storage.save_result(&result).await else {
            return result;
        };

        let event = PostRequestEvent::from_result(&saved);
        if let Err(e) = publish_json(self.bus.as_ref(), &self.topics.post_request(), &event).await {
            warn!(monitor_id = %saved.monitor_id, result_id = %saved.id, error = %e, "Failed to publish post-request event");
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::ondemand::{Delivery, RunRegistry};
    use crate::storage::InMemoryStorage;
    use probe::HttpOptions;
    use std::time::Duration;

    /// An address with nothing listening
    fn closed_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/{{{{path}}}}")
    }

    fn monitor(status: MonitorStatus) -> Monitor {
        let mut m: Monitor = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "accountId": "acct",
            "url": closed_url(),
            "envIds": ["staging", "missing"],
            "variables": [["path", "local"]],
            "timeout": 2,
        }))
        .unwrap();
        m.status = status;
        m
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        bus: Arc<LocalBus>,
        registry: Arc<RunRegistry>,
        worker: Worker,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = Arc::new(LocalBus::default());
        let registry = Arc::new(RunRegistry::new());
        let engine = Arc::new(Engine::new(HttpOptions { timeout: Duration::from_secs(2), ..Default::default() }).unwrap());
        let worker = Worker::new(engine, storage.clone(), bus.clone(), Topics::new("test"), registry.clone());
        Fixture { storage, bus, registry, worker }
    }

    #[tokio::test]
    async fn test_environment_layers() {
        let f = fixture();
        f.storage
            .set_global_environment("acct", vec![("host".into(), "global".into()), ("path".into(), "g".into())])
            .await;
        f.storage
            .set_environment("acct", "staging", vec![("host".into(), "staging".into()), ("token".into(), "t".into())])
            .await;

        let env = f.worker.environment(&monitor(MonitorStatus::Active)).await;

        assert_eq!(env["host"], "staging");
        assert_eq!(env["token"], "t");
        assert_eq!(env["path"], "local");
    }

    #[tokio::test]
    async fn test_scheduled_result_is_saved_and_announced() {
        let f = fixture();
        let mut events = f.bus.subscribe(&Topics::new("test").post_request());
        let message = DispatchMessage { run_id: None, location: "eu".into(), monitor: monitor(MonitorStatus::Active) };

        let result = f.worker.handle(message).await;

        assert_eq!(result.err, "ERR_CONNECTION_REFUSED");
        assert!(result.url.ends_with("/local"));
        assert_eq!(result.location, "eu");
        assert_eq!(f.storage.result_count().await, 1);

        let event: PostRequestEvent = events.next().await.unwrap().decode().unwrap();
        assert_eq!(event, PostRequestEvent::from_result(&result));
    }

    #[tokio::test]
    async fn test_failed_save_skips_event() {
        let f = fixture();
        f.storage.set_fail_writes(true);
        let mut events = f.bus.subscribe(&Topics::new("test").post_request());

        let message = DispatchMessage { run_id: None, location: "eu".into(), monitor: monitor(MonitorStatus::Active) };
        f.worker.handle(message).await;

        assert_eq!(f.storage.result_count().await, 0);
        assert!(tokio::time::timeout(Duration::from_millis(50), events.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_ondemand_result_is_not_persisted() {
        let f = fixture();
        let mut rx = f.registry.register("run-1");
        let mut events = f.bus.subscribe(&Topics::new("test").post_request());

        let message = DispatchMessage {
            run_id: Some("run-1".into()),
            location: "local".into(),
            monitor: monitor(MonitorStatus::Ondemand),
        };
        let result = f.worker.handle(message).await;

        assert_eq!(rx.try_recv().unwrap(), result);
        assert_eq!(f.storage.result_count().await, 0);
        assert_eq!(f.registry.resolve("run-1", result), Delivery::Ignored);
        assert!(tokio::time::timeout(Duration::from_millis(50), events.next()).await.is_err());
    }
}
