use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config_store::{ConfigStore, FeeConfig};
use crate::errors::FeeResult;
use crate::service::FeeService;
use crate::validation::InputValidator;

pub const ENVIRONMENT_VAR: &str = "THOR_FEES_ENV";
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Loaded configuration plus the services built from it.
pub struct FeeContext {
    root_dir: PathBuf,
    config_store: ConfigStore,
    config: FeeConfig,
    service: FeeService,
    validator: InputValidator,
    environment: String,
}

impl FeeContext {
    pub fn initialize(root_dir: PathBuf) -> FeeResult<Self> {
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        Self::initialize_with(root_dir, environment, FeeService::from_config)
    }

    /// Like [`FeeContext::initialize`] with an explicit environment and a
    /// custom way of building the service from config.
    pub fn initialize_with<F>(
        root_dir: PathBuf,
        environment: impl Into<String>,
        build_service: F,
    ) -> FeeResult<Self>
    where
        F: FnOnce(&FeeConfig) -> FeeResult<FeeService>,
    {
        let environment = environment.into();
        std::fs::create_dir_all(&root_dir)?;

        let config_store = ConfigStore::in_dir(&root_dir);
        let config = config_store.load_or_default(environment.clone())?;
        let service = build_service(&config)?;
        log::info!(
            "fee context ready for network {} ({})",
            config.network.name,
            environment
        );

        Ok(Self {
            root_dir,
            config_store,
            config,
            service,
            validator: InputValidator::new()?,
            environment,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn service(&self) -> &FeeService {
        &self.service
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Persist a config change and rebuild the HTTP-backed service.
    pub fn update_config<F>(&mut self, updater: F) -> FeeResult<&FeeConfig>
    where
        F: FnOnce(&mut FeeConfig) -> FeeResult<()>,
    {
        self.update_config_with(updater, FeeService::from_config)
    }

    pub fn update_config_with<F, B>(&mut self, updater: F, build_service: B) -> FeeResult<&FeeConfig>
    where
        F: FnOnce(&mut FeeConfig) -> FeeResult<()>,
        B: FnOnce(&FeeConfig) -> FeeResult<FeeService>,
    {
        let updated = self
            .config_store
            .update(self.environment.clone(), updater)?;
        self.service = build_service(&updated)?;
        self.config = updated;
        Ok(&self.config)
    }
}

/// Shared fee context for hosts serving concurrent callers.
#[derive(Clone)]
pub struct SharedFeeContext(pub Arc<RwLock<FeeContext>>);

impl SharedFeeContext {
    pub fn new(inner: FeeContext) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    pub fn read<F, T>(&self, op: F) -> FeeResult<T>
    where
        F: FnOnce(&FeeContext) -> FeeResult<T>,
    {
        op(&self.0.read())
    }

    pub fn write<F, T>(&self, op: F) -> FeeResult<T>
    where
        F: FnOnce(&mut FeeContext) -> FeeResult<T>,
    {
        op(&mut self.0.write())
    }

    /// Clone of the current service, for use across `.await` points.
    pub fn service(&self) -> FeeService {
        self.0.read().service.clone()
    }
}
