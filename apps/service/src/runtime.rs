//! Process wiring.
//!
//! Builds the shared collaborators once from [`Config`] and starts the
//! pipeline stages named in `service.roles`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use probe::{Engine, HttpSandbox};
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::auth::PushAuth;
use crate::bus::push::{PushBus, PushReceiver};
use crate::bus::{LocalBus, MessageBus, Topics};
use crate::config::{BusTransport, Config, OndemandTransport, Role};
use crate::escalation::EscalationEngine;
use crate::notify::{EmailSender, Notifier, WebhookSender};
use crate::ondemand::{BusSink, OndemandCoordinator, OndemandSink, RunRegistry};
use crate::scheduler::Scheduler;
use crate::storage::{InMemoryStorage, Storage};
use crate::worker::Worker;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Runtime {
    pub config: Arc<Config>,
    pub topics: Topics,
    pub storage: Arc<dyn Storage>,
    pub bus: Arc<dyn MessageBus>,
    pub coordinator: Arc<OndemandCoordinator>,
    /// Present when the bus transport is `push`
    pub push_receiver: Option<Arc<PushReceiver>>,
    registry: Arc<RunRegistry>,
    handles: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub async fn build(config: Config) -> Result<Self> {
        let storage = match &config.storage.seed_file {
            Some(path) => InMemoryStorage::from_seed_file(path).await?,
            None => InMemoryStorage::new(),
        };
        let storage = Arc::new(storage.with_retention(config.retention_policy()));

        let mut runtime = Self::with_storage(config, storage.clone())?;
        runtime.handles.push(storage.start_periodic_cleanup(RETENTION_SWEEP_INTERVAL));
        Ok(runtime)
    }

    pub fn with_storage(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let topics = Topics::new(config.service.scope.clone());
        let inbox = Arc::new(LocalBus::new(config.bus.channel_capacity));

        let (bus, push_receiver) = match config.bus.transport {
            BusTransport::Local => {
                let bus: Arc<dyn MessageBus> = inbox;
                (bus, None)
            }
            BusTransport::Push => {
                let push = &config.bus.push;
                let auth = || PushAuth::new(&push.secret, &push.issuer, &push.audience);
                let bus: Arc<dyn MessageBus> = Arc::new(PushBus::new(auth(), push.endpoints.clone(), inbox.clone())?);
                (bus, Some(Arc::new(PushReceiver::new(auth(), inbox))))
            }
        };

        let registry = Arc::new(RunRegistry::new());
        let coordinator = Arc::new(OndemandCoordinator::new(
            bus.clone(),
            topics.clone(),
            registry.clone(),
            Duration::from_secs(config.ondemand.timeout_seconds),
            config.service.default_region.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            topics,
            storage,
            bus,
            coordinator,
            push_receiver,
            registry,
            handles: Vec::new(),
        })
    }

    /// Start every stage this process is configured for.
    pub fn start(&mut self) -> Result<()> {
        let config = self.config.clone();

        if config.ondemand.transport == OndemandTransport::Bus {
            let listener = self.registry.clone().listen(self.bus.as_ref(), &self.topics.ondemand_response());
            self.handles.push(listener);
        }

        if config.has_role(Role::Worker) {
            let mut engine = Engine::new(config.http_options()).context("building HTTP engine")?;
            if let Some(url) = &config.sandbox.url {
                let sandbox = HttpSandbox::new(url.clone(), config.execution.timeout_seconds)?;
                engine = engine.with_scripts(Arc::new(sandbox));
            }

            let sink: Arc<dyn OndemandSink> = match config.ondemand.transport {
                OndemandTransport::InProcess => self.registry.clone(),
                OndemandTransport::Bus => Arc::new(BusSink::new(self.bus.clone(), &self.topics)),
            };

            let worker = Arc::new(Worker::new(
                Arc::new(engine),
                self.storage.clone(),
                self.bus.clone(),
                self.topics.clone(),
                sink,
            ));
            self.handles.extend(worker.spawn(&config.service.regions));
        }

        if config.has_role(Role::Escalation) {
            let email = match (&config.notifications.sendgrid_api_key, &config.notifications.sender_email) {
                (Some(key), Some(sender)) => {
                    Some(EmailSender::new(key.clone(), sender.clone(), config.notifications.sendgrid_url.clone()))
                }
                _ => None,
            };
            let notifier = Arc::new(Notifier::new(WebhookSender::new(), email));
            let engine = Arc::new(EscalationEngine::new(self.storage.clone(), notifier));
            self.handles.push(engine.spawn(self.bus.as_ref(), &self.topics));
        }

        // subscribers are in place before the first tick publishes
        if config.has_role(Role::Scheduler) {
            let default_region = Some(config.service.default_region.clone()).filter(|r| !r.is_empty());
            let tick_seconds = u32::try_from(config.service.tick_seconds).unwrap_or(10);
            let scheduler = Arc::new(Scheduler::new(
                self.storage.clone(),
                self.bus.clone(),
                self.topics.clone(),
                tick_seconds,
                default_region,
            ));
            self.handles.push(tokio::spawn(scheduler.run()));
        }

        info!(roles = ?config.service.roles, regions = ?config.service.regions, "Runtime started");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::messages::DispatchMessage;
    use crate::bus::publish_json;
    use probe::Monitor;

    fn config(transport: OndemandTransport) -> Config {
        let mut config = Config::default();
        config.service.roles = vec![Role::Worker];
        config.ondemand.transport = transport;
        config.ondemand.timeout_seconds = 5;
        config.execution.timeout_seconds = 2;
        config
    }

    fn closed_monitor() -> Monitor {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        serde_json::from_value(serde_json::json!({"id": "draft", "accountId": "x", "url": format!("http://{addr}/")}))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ondemand_through_both_transports() {
        for transport in [OndemandTransport::InProcess, OndemandTransport::Bus] {
            let mut runtime = Runtime::with_storage(config(transport), Arc::new(InMemoryStorage::new())).unwrap();
            runtime.start().unwrap();

            let result = runtime.coordinator.run("acct", closed_monitor()).await.unwrap();
            assert_eq!(result.err, "ERR_CONNECTION_REFUSED", "{transport:?}");
            assert_eq!(result.account_id, "acct");
            runtime.shutdown();
        }
    }

    #[tokio::test]
    async fn test_worker_role_persists_dispatched_results() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut runtime = Runtime::with_storage(config(OndemandTransport::InProcess), storage.clone()).unwrap();
        runtime.start().unwrap();
        let mut events = runtime.bus.subscribe(&runtime.topics.post_request());

        let message = DispatchMessage { run_id: None, location: "local".into(), monitor: closed_monitor() };
        publish_json(runtime.bus.as_ref(), &runtime.topics.dispatch("local"), &message).await.unwrap();

        assert!(events.next().await.is_some());
        assert_eq!(storage.result_count().await, 1);
    }
}
