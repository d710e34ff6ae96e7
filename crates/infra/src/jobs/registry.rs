//! One live service per name.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use seisflow_core::sync::{read, write};
use seisflow_events::MessageBus;

use super::service::{Service, ServiceConfig, ServiceError};

/// Keeps at most one live [`Service`] per name.
///
/// Held by the composition root; callers look services up here instead of
/// constructing a second scheduler with its own queue.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    bus: Option<MessageBus>,
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    /// Services started here publish their status on `bus`.
    pub fn new(bus: Option<MessageBus>) -> Self {
        Self {
            bus,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Create and start a service; fails if one with that name is live.
    ///
    /// A stopped service with the same name is replaced.
    pub fn start(&self, config: ServiceConfig) -> Result<Service, ServiceError> {
        let mut services = write(&self.services);
        if services.get(&config.name).is_some_and(|s| !s.is_stopped()) {
            return Err(ServiceError::AlreadyRunning(config.name));
        }
        self.launch(&mut services, config)
    }

    /// The live service with `config.name`, or a newly started one.
    pub fn get_or_start(&self, config: ServiceConfig) -> Result<Service, ServiceError> {
        let mut services = write(&self.services);
        if let Some(existing) = services.get(&config.name).filter(|s| !s.is_stopped()) {
            return Ok(existing.clone());
        }
        self.launch(&mut services, config)
    }

    fn launch(
        &self,
        services: &mut HashMap<String, Service>,
        config: ServiceConfig,
    ) -> Result<Service, ServiceError> {
        let name = config.name.clone();
        let service = Service::new(config, self.bus.clone())?;
        service.start()?;
        services.insert(name.clone(), service.clone());
        info!(service = %name, "service registered");
        Ok(service)
    }

    /// The live service registered under `name`.
    pub fn get(&self, name: &str) -> Option<Service> {
        read(&self.services)
            .get(name)
            .filter(|s| !s.is_stopped())
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.services).keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and forget the service registered under `name`.
    pub fn stop(&self, name: &str) -> bool {
        let service = write(&self.services).remove(name);
        match service {
            Some(service) => {
                service.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every registered service.
    pub fn stop_all(&self) {
        let services: Vec<Service> = write(&self.services).drain().map(|(_, s)| s).collect();
        for service in services {
            service.stop();
        }
    }
}
