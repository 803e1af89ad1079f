use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::middlewares::auth::JwtService;
use entity_store::{EntityStore, InMemoryEntityStore};
use mongo_store::MongoEntityStore;
use room_registry::RoomRegistry;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn EntityStore>,
    pub rooms: Arc<RoomRegistry>,
    pub jwt: JwtService,
}

impl AppState {
    /// Connects to MongoDB when a URI is configured, otherwise falls back to
    /// the in-memory store (seeded from `seed_file` if set).
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn EntityStore> = match &config.mongo_uri {
            Some(uri) => {
                tracing::info!("Attempting to connect to MongoDB...");
                let client = mongodb::Client::with_uri_str(uri).await?;
                let store = MongoEntityStore::new(client.database(&config.mongo_database));

                tokio::time::timeout(Duration::from_secs(10), store.ping())
                    .await
                    .map_err(|_| anyhow::anyhow!("MongoDB ping timeout after 10s"))??;

                tracing::info!("MongoDB connection established successfully");
                Arc::new(store)
            }
            None => {
                tracing::warn!("No MongoDB URI configured, using in-memory entity store");
                match &config.seed_file {
                    Some(path) => Arc::new(InMemoryEntityStore::from_seed_file(path)?),
                    None => Arc::new(InMemoryEntityStore::new()),
                }
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn EntityStore>) -> Self {
        let rooms = Arc::new(RoomRegistry::new(
            store.clone(),
            config.taxonomy.clone(),
            config.rooms.clone(),
        ));
        let jwt = JwtService::new(&config.jwt_secret);

        Self {
            config,
            store,
            rooms,
            jwt,
        }
    }
}

pub mod category_service;
pub mod entity_store;
pub mod grouping_service;
pub mod mongo_store;
pub mod room_gateway;
pub mod room_registry;
pub mod room_sweeper;
pub mod scoring;
