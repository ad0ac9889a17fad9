//! Top-level wiring: the registry controller and its event pump.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ControllerSettings;
use crate::controller::Controller;
use crate::registry::ScopeRegistry;
use crate::router::{EventPump, RegistryRouter};
use crate::store::ClusterStore;

pub struct Manager {
    store: Arc<dyn ClusterStore>,
    settings: ControllerSettings,
    registry: Arc<ScopeRegistry>,
}

impl Manager {
    pub fn new(store: Arc<dyn ClusterStore>, settings: ControllerSettings) -> Self {
        let registry = Arc::new(ScopeRegistry::new(Arc::clone(&store), settings.clone()));
        Self {
            store,
            settings,
            registry,
        }
    }

    pub fn registry(&self) -> Arc<ScopeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until `shutdown` flips to `true`, then stop every scope.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("Starting manager");

        let controller = Controller::new(self.registry.clone(), &self.settings);
        let pump = EventPump::new(RegistryRouter, controller.queue(), Arc::clone(&self.store));
        let pump_task = tokio::spawn(pump.run(shutdown.clone()));

        controller.run(shutdown).await;
        if let Err(e) = pump_task.await {
            error!(error = %e, "Registry event pump failed");
        }

        self.registry.stop_all().await;
        info!("Manager stopped");
    }
}
