//! Composition root: one message bus, one service registry, an optional journal.
//!
//! Construct a [`Runtime`] once at process start and pass it (or the handles it
//! hands out) to whoever needs to publish, subscribe or submit jobs.

use tracing::info;

use seisflow_events::{DispatchError, Dispatcher, MessageBus};

use crate::config::{ConfigError, RuntimeConfig};
use crate::jobs::{Service, ServiceError, ServiceRegistry};
use crate::journal::{JournalError, MessageJournal, new_session};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    session: String,
    bus: MessageBus,
    services: ServiceRegistry,
    journal: Option<MessageJournal>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let bus: MessageBus = Dispatcher::new(config.dispatcher.clone())?;
        let session = new_session();

        let journal = match &config.journal_dir {
            Some(dir) => Some(MessageJournal::open(dir, &session, &bus)?),
            None => None,
        };
        let services = ServiceRegistry::new(Some(bus.clone()));

        info!(session = %session, journal = journal.is_some(), "runtime started");
        Ok(Self {
            config,
            session,
            bus,
            services,
            journal,
        })
    }

    /// Build from `SEISFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::new(RuntimeConfig::from_env()?)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn journal(&self) -> Option<&MessageJournal> {
        self.journal.as_ref()
    }

    /// The live service called `name`, started from the configured template if absent.
    pub fn service(&self, name: &str) -> Result<Service, RuntimeError> {
        Ok(self.services.get_or_start(self.config.service_named(name))?)
    }

    /// Stop every service, then drain and stop the bus.
    pub fn shutdown(self) {
        self.services.stop_all();
        self.bus.stop();
        drop(self.journal);
        info!(session = %self.session, "runtime stopped");
    }
}
