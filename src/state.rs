use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::AppConfig,
    db,
    events::{Broadcaster, Hub},
    images::{ImageStorage, S3ImageStorage},
    meals::PgMealCatalog,
    orders::{OrderService, PgOrderRepository},
    storage::{Storage, StorageClient},
};

const REVIEW_PHOTO_PREFIX: &str = "reviews";

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub orders: Arc<OrderService<PgOrderRepository>>,
    pub hub: Broadcaster,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = db::connect(&config).await?;

        // Real S3/MinIO
        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let images = Arc::new(S3ImageStorage::new(
            storage,
            REVIEW_PHOTO_PREFIX,
            &config.storage.public_base_url,
        )) as Arc<dyn ImageStorage>;

        let hub = Hub::spawn(&config.hub);
        let orders = Arc::new(OrderService::new(
            PgOrderRepository::new(db.clone()),
            Arc::new(PgMealCatalog::new(db.clone())),
            images,
            hub.clone(),
        ));

        Ok(Self {
            db,
            config,
            orders,
            hub,
        })
    }
}

impl FromRef<AppState> for Broadcaster {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}
