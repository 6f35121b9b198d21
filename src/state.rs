use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{memory::MemoryStore, postgres::PgStore, Store};
use crate::storage::{MemoryStorage, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url).await?;
                if let Err(e) = pg.migrate().await {
                    warn!(error = %e, "migration failed; continuing");
                }
                info!("using postgres store");
                Arc::new(pg) as Arc<dyn Store>
            }
            None => {
                warn!("DATABASE_URL not set; data lives in memory only");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        let storage = match &config.s3 {
            Some(s3) => {
                info!(endpoint = %s3.endpoint, bucket = %s3.bucket, "using s3 media storage");
                Arc::new(S3Storage::new(s3).await?) as Arc<dyn StorageClient>
            }
            None => {
                warn!("MINIO_* not set; media payloads live in memory only");
                Arc::new(MemoryStorage::new()) as Arc<dyn StorageClient>
            }
        };

        Ok(Self::from_parts(store, config, storage))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            store,
            config,
            storage,
        }
    }

    /// In-memory wiring for tests; returns the storage handle for inspection.
    #[cfg(test)]
    pub fn fake() -> (Self, Arc<MemoryStorage>) {
        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: crate::config::JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
                update_last_login: true,
            },
            s3: None,
            admin: None,
        });
        let storage = Arc::new(MemoryStorage::new());
        let state = Self::from_parts(
            Arc::new(MemoryStore::new()),
            config,
            storage.clone() as Arc<dyn StorageClient>,
        );
        (state, storage)
    }
}
