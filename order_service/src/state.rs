// medflow-orders/src/state.rs

use crate::config::{AppConfig, StoreBackend};
use crate::db::{MemoryStore, PgStore, Store};
use crate::errors::{AppError, Result as AppResult};
use crate::pipelines;
use crate::queue::{MemoryQueue, PgQueue, RetryPolicy, TaskQueue, Worker};
use crate::services::object_store::{LocalObjectStore, ObjectStore};
use crate::services::shipping::{self, CourierQuoter};
use medflow::FlowRegistry;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

/// Everything a request handler or task handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub flows: Arc<FlowRegistry<AppError>>,
  pub queue: Arc<dyn TaskQueue>,
  pub objects: Arc<dyn ObjectStore>,
  pub couriers: Arc<Vec<Arc<dyn CourierQuoter>>>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Wires the given backends together and registers every pipeline.
  pub fn new(
    config: AppConfig,
    store: Arc<dyn Store>,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
  ) -> Self {
    let flows = FlowRegistry::<AppError>::new();
    pipelines::register_all_pipelines(&flows);
    Self {
      store,
      flows: Arc::new(flows),
      queue,
      objects,
      couriers: Arc::new(shipping::default_couriers()),
      config: Arc::new(config),
    }
  }

  pub fn with_couriers(mut self, couriers: Vec<Arc<dyn CourierQuoter>>) -> Self {
    self.couriers = Arc::new(couriers);
    self
  }

  /// Connects the backends `config` asks for, running migrations when enabled.
  pub async fn from_config(config: AppConfig) -> AppResult<Self> {
    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
      config.storage_dir.clone(),
      config.storage_public_url.clone(),
    ));

    let (store, queue): (Arc<dyn Store>, Arc<dyn TaskQueue>) = match config.store_backend {
      StoreBackend::Memory => {
        info!("Using the in-memory store and queue; nothing survives a restart.");
        (
          Arc::new(MemoryStore::new()),
          Arc::new(MemoryQueue::new(config.task_max_attempts, config.task_lease)),
        )
      }
      StoreBackend::Postgres => {
        let url = config
          .database_url
          .as_deref()
          .ok_or_else(|| AppError::Config("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
          .max_connections(config.database_max_connections)
          .connect(url)
          .await?;
        info!("Connected to the database.");
        if config.run_migrations {
          sqlx::migrate!("./migrations").run(&pool).await?;
          info!("Database migrations applied.");
        }
        (
          Arc::new(PgStore::new(pool.clone())),
          Arc::new(PgQueue::new(pool, config.task_max_attempts, config.task_lease)),
        )
      }
    };

    Ok(Self::new(config, store, queue, objects))
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.config.task_retry_base, self.config.task_retry_max)
  }

  /// A worker wired to this state's queue and task handlers.
  pub fn worker(&self) -> Worker {
    Worker::new(
      Arc::clone(&self.queue),
      crate::queue::tasks::build_router(self),
      self.retry_policy(),
      self.config.task_poll_interval,
    )
  }
}
