//! Ledger hardware wallet connection manager.
//!
//! The transport itself (BLE, USB, HID) sits behind [`LedgerDevice`]. This
//! module owns the connection lifecycle: availability polling, app
//! verification, serialised transport access and reconnecting after the
//! device drops the link, which it does every time the user enters or leaves
//! an app on it.
//!
//! Once the transport is open the app is re-verified every poll interval
//! until it is open with contract data and multi-clause both enabled.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::blockchain::hex_bytes;
use crate::config_store::LedgerConfig;
use crate::errors::{FeeError, FeeResult};

const MAX_BACKOFF_EXPONENT: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped without `remove`; attempts continue with backoff
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerErrorCode {
    DeviceNotFound,
    Disconnected,
    AppNotOpen,
    ContractAndClausesDisabled,
    ContractDisabled,
    ClausesDisabled,
    Unknown,
}

impl fmt::Display for LedgerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LedgerErrorCode::DeviceNotFound => "device not found",
            LedgerErrorCode::Disconnected => "device disconnected",
            LedgerErrorCode::AppNotOpen => "VeChain app is not open",
            LedgerErrorCode::ContractAndClausesDisabled => {
                "contract data and multi-clause are disabled"
            }
            LedgerErrorCode::ContractDisabled => "contract data is disabled",
            LedgerErrorCode::ClausesDisabled => "multi-clause is disabled",
            LedgerErrorCode::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// VeChain app settings, from the first two characters of its config string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppConfig {
    ContractAndClausesDisabled,
    ContractOnlyEnabled,
    ClausesOnlyEnabled,
    ContractAndClausesEnabled,
    Unknown,
}

impl AppConfig {
    pub fn parse(config: &str) -> Self {
        match config.get(..2) {
            Some("00") => AppConfig::ContractAndClausesDisabled,
            Some("01") => AppConfig::ContractOnlyEnabled,
            Some("10") => AppConfig::ClausesOnlyEnabled,
            Some("11") => AppConfig::ContractAndClausesEnabled,
            _ => AppConfig::Unknown,
        }
    }

    /// Error to surface for this config, if signing would be blocked.
    pub fn error_code(self) -> Option<LedgerErrorCode> {
        match self {
            AppConfig::ContractAndClausesDisabled => Some(LedgerErrorCode::ContractAndClausesDisabled),
            AppConfig::ContractOnlyEnabled => Some(LedgerErrorCode::ClausesDisabled),
            AppConfig::ClausesOnlyEnabled => Some(LedgerErrorCode::ContractDisabled),
            AppConfig::ContractAndClausesEnabled | AppConfig::Unknown => None,
        }
    }
}

/// Root account exported by the device; child accounts derive from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub chain_code: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerVerification {
    pub root_account: LedgerAccount,
    pub app_config: String,
}

#[async_trait]
pub trait LedgerDevice: Send + Sync + 'static {
    type Transport: Send + 'static;

    /// Whether the device is advertising and connectable.
    async fn is_available(&self) -> bool;

    async fn open(&self) -> FeeResult<Self::Transport>;

    /// Check the VeChain app is open and read its root account and config.
    async fn verify(&self, transport: &mut Self::Transport) -> FeeResult<LedgerVerification>;

    async fn close(&self, transport: Self::Transport) -> FeeResult<()>;
}

pub type TransportFuture<'t, T> = Pin<Box<dyn Future<Output = FeeResult<T>> + Send + 't>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStatus {
    pub error_code: Option<LedgerErrorCode>,
    pub app_config: AppConfig,
    pub root_account: Option<LedgerAccount>,
}

impl Default for LedgerStatus {
    fn default() -> Self {
        Self {
            error_code: None,
            app_config: AppConfig::Unknown,
            root_account: None,
        }
    }
}

struct Shared<D: LedgerDevice> {
    device: D,
    transport: tokio::sync::Mutex<Option<D::Transport>>,
    state: watch::Sender<ConnectionState>,
    status: RwLock<LedgerStatus>,
    removed: RwLock<bool>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    connect_timeout: Duration,
    poll_interval: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
}

/// Owns one device's connection. Cheap to clone; clones share state.
pub struct LedgerConnection<D: LedgerDevice> {
    shared: Arc<Shared<D>>,
}

impl<D: LedgerDevice> Clone for LedgerConnection<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: LedgerDevice> LedgerConnection<D> {
    pub fn new(device: D, config: &LedgerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                device,
                transport: tokio::sync::Mutex::new(None),
                state,
                status: RwLock::new(LedgerStatus::default()),
                removed: RwLock::new(false),
                reconnect_task: Mutex::new(None),
                poll_task: Mutex::new(None),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                backoff_base: Duration::from_millis(config.reconnect_base_ms.max(1)),
                backoff_cap: Duration::from_millis(config.reconnect_cap_ms),
            }),
        }
    }

    pub fn device(&self) -> &D {
        &self.shared.device
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn status(&self) -> LedgerStatus {
        self.shared.status.read().clone()
    }

    pub fn error_code(&self) -> Option<LedgerErrorCode> {
        self.shared.status.read().error_code
    }

    pub fn root_account(&self) -> Option<LedgerAccount> {
        self.shared.status.read().root_account.clone()
    }

    /// Open and verify the device. A no-op while already connected or
    /// connecting.
    ///
    /// If the VeChain app is not open the transport is kept, the state stays
    /// `Connecting` and verification is retried in the background.
    pub async fn connect(&self) -> FeeResult<()> {
        *self.shared.removed.write() = false;

        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            log::debug!("ledger connect skipped, state is {:?}", self.state());
            return Ok(());
        }

        let result = self.establish().await;
        if result.is_err() {
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    /// Re-read the app config over the open transport.
    pub async fn verify(&self) -> FeeResult<LedgerVerification> {
        let mut guard = self.shared.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or(FeeError::Ledger(LedgerErrorCode::Disconnected))?;
        let result = self.shared.device.verify(transport).await;
        drop(guard);
        self.record_verification(&result);
        result
    }

    /// Whether the background app check is still running.
    pub fn is_polling(&self) -> bool {
        self.shared
            .poll_task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Run `operation` with exclusive use of the transport.
    pub async fn with_transport<T, F>(&self, operation: F) -> FeeResult<T>
    where
        F: for<'t> FnOnce(&'t mut D::Transport) -> TransportFuture<'t, T>,
    {
        if self.state() != ConnectionState::Connected {
            return Err(FeeError::Ledger(LedgerErrorCode::Disconnected));
        }
        let mut guard = self.shared.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or(FeeError::Ledger(LedgerErrorCode::Disconnected))?;
        operation(transport).await
    }

    /// Report that the transport dropped. Starts reconnecting unless the
    /// device was removed.
    pub fn notify_disconnected(&self) -> FeeResult<()> {
        self.stop_polling();
        {
            let mut status = self.shared.status.write();
            status.root_account = None;
            status.error_code = Some(LedgerErrorCode::Disconnected);
        }

        if *self.shared.removed.read() {
            log::debug!("ledger disconnected after removal, not reconnecting");
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| FeeError::Unknown(format!("No async runtime: {}", e)))?;

        let mut task = self.shared.reconnect_task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return Ok(());
        }

        log::warn!("ledger disconnected, reconnecting");
        self.set_state(ConnectionState::Reconnecting);
        let connection = self.clone();
        *task = Some(handle.spawn(async move { connection.reconnect_loop().await }));
        Ok(())
    }

    /// Disconnect on purpose and stop any reconnect attempts.
    pub async fn remove(&self) {
        *self.shared.removed.write() = true;
        if let Some(task) = self.shared.reconnect_task.lock().take() {
            task.abort();
        }
        self.stop_polling();

        let transport = self.shared.transport.lock().await.take();
        if let Some(transport) = transport {
            if let Err(e) = self.shared.device.close(transport).await {
                log::error!("failed to close ledger transport: {}", e);
            }
        }

        *self.shared.status.write() = LedgerStatus::default();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let multiplier = 1_u32 << exponent;
        self.shared
            .backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.shared.backoff_cap)
            .min(self.shared.backoff_cap)
    }

    async fn reconnect_loop(&self) {
        let mut attempt = 0;
        loop {
            if *self.shared.removed.read() {
                return;
            }
            match self.establish().await {
                Ok(()) => {
                    log::info!("ledger reconnected after {} attempts", attempt + 1);
                    return;
                }
                Err(e) => {
                    let delay = self.reconnect_delay(attempt);
                    log::debug!("ledger reconnect attempt {} failed: {}", attempt + 1, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn establish(&self) -> FeeResult<()> {
        if !self.wait_until_available().await {
            self.set_error(Some(LedgerErrorCode::DeviceNotFound));
            return Err(FeeError::Ledger(LedgerErrorCode::DeviceNotFound));
        }

        let mut guard = self.shared.transport.lock().await;
        if let Some(stale) = guard.take() {
            if let Err(e) = self.shared.device.close(stale).await {
                log::debug!("closing stale ledger transport failed: {}", e);
            }
        }

        let mut transport = match self.shared.device.open().await {
            Ok(transport) => transport,
            Err(e) => {
                log::warn!("error opening ledger connection: {}", e);
                self.set_error(Some(LedgerErrorCode::Unknown));
                return Err(e);
            }
        };

        let result = self.shared.device.verify(&mut transport).await;
        *guard = Some(transport);
        drop(guard);

        if self.record_verification(&result) {
            self.stop_polling();
        } else {
            if let Err(e) = &result {
                log::info!("ledger open but app not ready: {}", e);
            }
            self.start_polling();
        }
        Ok(())
    }

    fn start_polling(&self) {
        let connection = self.clone();
        let task = tokio::spawn(async move { connection.poll_app().await });
        if let Some(previous) = self.shared.poll_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_polling(&self) {
        if let Some(task) = self.shared.poll_task.lock().take() {
            task.abort();
        }
    }

    /// Re-verify until the app is open with both settings enabled.
    async fn poll_app(&self) {
        loop {
            tokio::time::sleep(self.shared.poll_interval).await;
            if *self.shared.removed.read() {
                return;
            }

            let mut guard = self.shared.transport.lock().await;
            let Some(transport) = guard.as_mut() else {
                return;
            };
            let result = self.shared.device.verify(transport).await;
            drop(guard);

            if self.record_verification(&result) {
                log::debug!("ledger app ready, polling stopped");
                return;
            }
        }
    }

    /// Apply a verification result to status and state. True once the app
    /// is open with contract data and multi-clause enabled.
    fn record_verification(&self, result: &FeeResult<LedgerVerification>) -> bool {
        self.apply_verification(result);
        match result {
            Ok(_) => {
                self.set_state(ConnectionState::Connected);
                self.shared.status.read().app_config == AppConfig::ContractAndClausesEnabled
            }
            Err(_) => {
                self.shared.state.send_if_modified(|state| {
                    if matches!(
                        *state,
                        ConnectionState::Connected | ConnectionState::Reconnecting
                    ) {
                        *state = ConnectionState::Connecting;
                        true
                    } else {
                        false
                    }
                });
                false
            }
        }
    }

    async fn wait_until_available(&self) -> bool {
        let poll = async {
            while !self.shared.device.is_available().await {
                tokio::time::sleep(self.shared.poll_interval).await;
            }
        };
        tokio::time::timeout(self.shared.connect_timeout, poll)
            .await
            .is_ok()
    }

    fn apply_verification(&self, result: &FeeResult<LedgerVerification>) {
        let mut status = self.shared.status.write();
        match result {
            Ok(verification) => {
                let config = AppConfig::parse(&verification.app_config);
                status.app_config = config;
                status.error_code = config.error_code();
                status.root_account = Some(verification.root_account.clone());
            }
            Err(FeeError::Ledger(code)) => status.error_code = Some(*code),
            Err(_) => status.error_code = Some(LedgerErrorCode::Unknown),
        }
    }

    fn set_error(&self, code: Option<LedgerErrorCode>) {
        self.shared.status.write().error_code = code;
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            log::debug!("ledger state {:?} -> {:?}", previous, state);
        }
    }
}
