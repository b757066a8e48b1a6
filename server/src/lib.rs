//! HTTP host for the puosu automation functions.
//!
//! Every function is exposed as `POST /functions/<name>` and runs against one shared
//! [`Datastore`]. The server owns the wall clock and the simulation RNG; the execution layer gets
//! both injected per call.

use anyhow::Context;
use puosu_execution::{Datastore, GameStatsSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

mod api;
pub use api::Api;
mod config;
pub use config::ServerConfig;
mod function;
pub use function::{ApiError, Function};
mod metrics;
pub use metrics::{FunctionMetrics, SystemMetrics};
mod persistence;
pub use persistence::SqliteStore;
mod stats;
pub use stats::HttpStatsSource;

pub struct Server<S: Datastore = SqliteStore, G: GameStatsSource = HttpStatsSource> {
    store: S,
    stats: G,
    pub config: ServerConfig,
    metrics: FunctionMetrics,
    system: SystemMetrics,
    rng: Mutex<StdRng>,
}

impl Server {
    /// Opens the configured SQLite datastore and stats client.
    pub fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => {
                tracing::warn!("no database_path configured; using an in-memory datastore");
                SqliteStore::open_in_memory()?
            }
        };
        let stats = HttpStatsSource::new(
            config.stats_api_url.as_deref(),
            Duration::from_millis(config.stats_timeout_ms),
        )
        .context("init stats source")?;
        Ok(Self::new(store, stats, config))
    }
}

impl<S: Datastore, G: GameStatsSource> Server<S, G> {
    pub fn new(store: S, stats: G, config: ServerConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            stats,
            config,
            metrics: FunctionMetrics::new(),
            system: SystemMetrics::new(),
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &FunctionMetrics {
        &self.metrics
    }

    /// Child RNG for one run; the shared generator is never held across an await.
    fn fork_rng(&self) -> StdRng {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::seed_from_u64(rng.gen())
    }
}
