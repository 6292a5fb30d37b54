use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::errors::{FeeError, FeeResult};
use crate::fees::estimator::{BaseGasPriceSource, DEFAULT_MIN_NEXT_REVISION_VERSION};
use crate::fees::GasPriceCoefficient;

const CONFIG_VERSION: u16 = 1;
pub const CONFIG_FILE_NAME: &str = "thor-fees.config";

pub const MAINNET_GENESIS_ID: &str =
    "0x00000000851caf3cfdb6e899cf5958bfb1ac3413d346d43539627e6be7ec1b4a";
pub const TESTNET_GENESIS_ID: &str =
    "0x000000000b2bce3c70bc649a02749e8687721b09ed2e15997f466536b20bb127";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Cache scope, e.g. `main` or `test`
    pub name: String,
    pub endpoint: String,
    pub genesis_id: String,
    pub request_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn mainnet() -> Self {
        Self {
            name: "main".to_string(),
            endpoint: "https://mainnet.vechain.org".to_string(),
            genesis_id: MAINNET_GENESIS_ID.to_string(),
            request_timeout_secs: 30,
        }
    }

    pub fn testnet() -> Self {
        Self {
            name: "test".to_string(),
            endpoint: "https://testnet.vechain.org".to_string(),
            genesis_id: TESTNET_GENESIS_ID.to_string(),
            request_timeout_secs: 30,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EstimationConfig {
    /// Lowest node version simulated against the `next` revision
    pub min_next_revision_version: String,
    pub base_gas_price: BaseGasPriceSource,
}

impl EstimationConfig {
    pub fn min_next_revision(&self) -> FeeResult<Version> {
        Version::parse(&self.min_next_revision_version).map_err(|e| {
            FeeError::ValidationError(format!(
                "Invalid node version {}: {}",
                self.min_next_revision_version, e
            ))
        })
    }
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            min_next_revision_version: DEFAULT_MIN_NEXT_REVISION_VERSION.to_string(),
            base_gas_price: BaseGasPriceSource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeMarketConfig {
    pub default_coefficient: GasPriceCoefficient,
    /// Block-keyed entries retained per cache
    pub cache_capacity: usize,
}

impl Default for FeeMarketConfig {
    fn default() -> Self {
        Self {
            default_coefficient: GasPriceCoefficient::Regular,
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            poll_interval_ms: 250,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 32_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeConfig {
    pub network: NetworkConfig,
    pub estimation: EstimationConfig,
    pub fees: FeeMarketConfig,
    pub ledger: LedgerConfig,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl FeeConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig::default(),
            estimation: EstimationConfig::default(),
            fees: FeeMarketConfig::default(),
            ledger: LedgerConfig::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: FeeConfig,
    modified_at_unix: i64,
}

/// Handles persistence of fee configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn in_dir(root_dir: impl AsRef<Path>) -> Self {
        Self::new(root_dir.as_ref().join(CONFIG_FILE_NAME))
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> FeeResult<FeeConfig> {
        if !self.path.exists() {
            let config = FeeConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(FeeError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(FeeError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &FeeConfig) -> FeeResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| FeeError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        log::debug!("saved fee config to {}", self.path.display());
        Ok(())
    }

    pub fn update<F>(&self, environment: impl Into<String>, updater: F) -> FeeResult<FeeConfig>
    where
        F: FnOnce(&mut FeeConfig) -> FeeResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &FeeConfig) -> FeeResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(config)?);
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::in_dir(temp.path());

        let mut config = FeeConfig::new("development");
        config.network = NetworkConfig::testnet();
        config.estimation.base_gas_price = BaseGasPriceSource::Params;
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.network.endpoint, "https://testnet.vechain.org");
        assert_eq!(loaded.estimation.base_gas_price, BaseGasPriceSource::Params);
        assert_eq!(loaded.fees.default_coefficient, GasPriceCoefficient::Regular);
    }

    #[test]
    fn missing_config_is_created() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::in_dir(temp.path().join("nested"));
        let config = store.load_or_default("test").unwrap();
        assert_eq!(config.environment, "test");
        assert!(store.path().exists());
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::in_dir(temp.path());
        store.save(&FeeConfig::new("test")).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), text.replace("mainnet.vechain.org", "evil.example")).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(FeeError::ValidationError(_))));
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::in_dir(temp.path());
        store
            .update("test", |config| {
                config.fees.default_coefficient = GasPriceCoefficient::High;
                config.estimation.min_next_revision_version = "2.4.1".into();
                Ok(())
            })
            .unwrap();

        let loaded = store.load_or_default("test").unwrap();
        assert_eq!(loaded.fees.default_coefficient, GasPriceCoefficient::High);
        assert_eq!(
            loaded.estimation.min_next_revision().unwrap(),
            Version::new(2, 4, 1)
        );
    }

    #[test]
    fn invalid_version_is_rejected() {
        let mut config = FeeConfig::new("test");
        config.estimation.min_next_revision_version = "two".into();
        assert!(matches!(
            config.estimation.min_next_revision(),
            Err(FeeError::ValidationError(_))
        ));
    }
}
