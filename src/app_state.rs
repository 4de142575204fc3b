// Application state shared by every HTTP handler

use crate::auth::{Authorizer, PinAuthorizer};
use crate::config::Config;
use crate::engine::{Engine, EngineConfig};
use crate::error::EngineResult;
use std::sync::Arc;
use tracing::warn;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    /// Sled handles concurrency itself, so no lock around the engine
    pub engine: Engine,
    pub authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    pub fn new(engine: Engine, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { engine, authorizer }
    }

    /// Open the on-disk store and PIN authorizer described by `config`.
    pub fn from_config(config: &Config) -> EngineResult<Self> {
        let engine = Engine::open(&config.db_path, EngineConfig::from(config))?;
        if config.admin_pin.is_none() {
            warn!("BETTING_ADMIN_PIN not set, admin endpoints are disabled");
        }
        let authorizer = Arc::new(PinAuthorizer::new(config.admin_pin.as_deref()));
        Ok(Self::new(engine, authorizer))
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
