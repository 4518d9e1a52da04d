#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod retry;
pub mod store;

pub use config::Config;

use backend::Backend;
use config::{BackendFairing, ConfigFairing};
use logging::LoggerFairing;

/// The server, with its backend chosen by configuration.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(BackendFairing::from_config())
}

/// The server on a given backend and config, ignoring both sections of the
/// figment. Used by tests and tools that bring their own backend.
pub fn rocket_for_backend(backend: Arc<dyn Backend>, config: Config) -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .manage(config)
        .attach(BackendFairing::with_backend(backend))
}
