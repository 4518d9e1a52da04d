use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::backend::{
    Backend, MemoryBackend, ServiceAccountKey, SheetsBackend, Tables, UnconfiguredBackend,
};
use crate::retry::RetryPolicy;
use crate::store::Stores;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_catalog_ttl")]
    catalog_ttl: u64,
    #[serde(default = "default_retry_attempts")]
    retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
    #[serde(default = "default_batch_chunk_size")]
    batch_chunk_size: usize,
    // secrets
    hmac_secret: String,
    admin_key: String,
}

fn default_catalog_ttl() -> u64 {
    30 * 60
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::DEFAULT_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_batch_chunk_size() -> usize {
    50
}

impl Config {
    /// Secret key used to seal ballot layouts and derive verification codes.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }

    /// Shared secret expected in the `X-Admin-Key` header of admin requests.
    pub fn admin_key(&self) -> &str {
        &self.admin_key
    }

    /// How long catalog reads are cached.
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl)
    }

    /// Backoff applied to every backend call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    /// Rows written per request by batch inserts.
    pub fn batch_chunk_size(&self) -> usize {
        self.batch_chunk_size.max(1)
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the backend fairing and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which record backend to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sheets,
    Memory,
}

/// Configuration for the record backend.
#[derive(Deserialize)]
struct BackendConfig {
    // non-secrets
    #[serde(default)]
    backend: BackendKind,
    sheet_id: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    requests_per_minute: u32,
    // secrets
    sheets_credentials: Option<String>,
}

fn default_requests_per_minute() -> u32 {
    60
}

impl BackendConfig {
    /// Build the configured backend. A Sheets backend that cannot be built is
    /// reported as the reason the backend is unconfigured.
    fn connect(self) -> Result<Arc<dyn Backend>, String> {
        match self.backend {
            BackendKind::Memory => {
                warn!("Using the in-memory backend; nothing will be persisted");
                Ok(Arc::new(MemoryBackend::new()))
            }
            BackendKind::Sheets => {
                let sheet_id = self
                    .sheet_id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or("`sheet_id` not set")?;
                let credentials = self
                    .sheets_credentials
                    .ok_or("`sheets_credentials` not set")?;
                let key = ServiceAccountKey::from_json(&credentials).map_err(|e| e.to_string())?;
                let backend = SheetsBackend::new(sheet_id, key, self.requests_per_minute)
                    .map_err(|e| e.to_string())?;
                Ok(Arc::new(backend))
            }
        }
    }
}

/// A fairing that loads the backend config, connects to the backend, makes
/// sure its fixed tables exist, and places the [`Stores`] into managed state.
///
/// It must be attached after [`ConfigFairing`]. A backend that cannot be
/// reached does not abort launch: every store call reports the problem instead.
pub struct BackendFairing {
    backend: Option<Arc<dyn Backend>>,
}

impl BackendFairing {
    /// Build the backend from configuration.
    pub fn from_config() -> Self {
        Self { backend: None }
    }

    /// Use an already-constructed backend, ignoring the backend configuration.
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

#[rocket::async_trait]
impl Fairing for BackendFairing {
    fn info(&self) -> Info {
        Info {
            name: "Record backend",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let backend = match &self.backend {
            Some(backend) => backend.clone(),
            None => {
                // Load the config.
                let backend_config = match rocket.figment().extract::<BackendConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load backend config");
                        rocket::config::pretty_print_error(e);
                        return Err(rocket);
                    }
                };
                info!("Loaded backend config, connecting...");
                match backend_config.connect() {
                    Ok(backend) => backend,
                    Err(reason) => {
                        error!("Backend is not configured, every store call will fail: {reason}");
                        Arc::new(UnconfiguredBackend::new(reason))
                    }
                }
            }
        };

        let Some(config) = rocket.state::<Config>() else {
            error!("Backend fairing attached before the application config was loaded");
            return Err(rocket);
        };
        let stores = Stores::new(Tables::new(backend, config.retry_policy()), config);
        match stores.init().await {
            Ok(()) => info!("...backend online!"),
            Err(e) => error!("Failed to prepare backend tables: {e}"),
        }

        // Manage the state.
        rocket = rocket.manage(stores);
        Ok(rocket)
    }
}
