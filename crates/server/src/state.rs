use std::sync::Arc;
use std::time::Duration;

use scriptrelay_core::{
    Authenticator, Config, EventBus, ExecutionStore, JobQueue, RunnerContext, SanitizedConfig,
    ScriptExecutor, ScriptStore, SqliteStore,
};

use crate::api::NotificationGateway;

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<SqliteStore>,
    queue: Arc<JobQueue>,
    runner: RunnerContext,
    gateway: NotificationGateway,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<SqliteStore>,
        executor: Arc<dyn ScriptExecutor>,
        queue: Arc<JobQueue>,
        bus: EventBus,
    ) -> Self {
        let runner = RunnerContext {
            executor,
            executions: Arc::clone(&store) as Arc<dyn ExecutionStore>,
            scripts: Arc::clone(&store) as Arc<dyn ScriptStore>,
            bus: bus.clone(),
            subscribe_grace: Duration::from_millis(config.runner.subscribe_grace_ms),
        };

        Self {
            config,
            authenticator,
            store,
            queue,
            runner,
            gateway: NotificationGateway::new(bus),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn scripts(&self) -> &dyn ScriptStore {
        self.store.as_ref()
    }

    pub fn executions(&self) -> &dyn ExecutionStore {
        self.store.as_ref()
    }

    pub fn queue(&self) -> &JobQueue {
        self.queue.as_ref()
    }

    pub fn runner(&self) -> &RunnerContext {
        &self.runner
    }

    pub fn gateway(&self) -> &NotificationGateway {
        &self.gateway
    }
}
