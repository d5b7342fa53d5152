use std::sync::Arc;

use crate::config::{AppConfig, BackendKind};
use crate::email::{Mailer, NullMailer, SmtpMailer};
use crate::federated::{IdentityProvider, UnconfiguredProvider};
use crate::store::{DocumentStore, PostgresStore, UserStore};

/// Shared application state. The store backend and all capabilities are
/// chosen once here and injected; nothing downstream branches on which
/// variant is running.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match config.backend {
            BackendKind::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("DATABASE_URL is required for the postgres backend")
                })?;
                Arc::new(PostgresStore::connect(url).await?)
            }
            BackendKind::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("REDIS_URL is required for the redis backend")
                })?;
                Arc::new(DocumentStore::connect(url)?)
            }
        };
        tracing::info!(backend = ?config.backend, "user store ready");

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => Arc::new(NullMailer),
        };

        Ok(Self {
            store,
            config,
            mailer,
            identity: Arc::new(UnconfiguredProvider),
        })
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            config,
            mailer,
            identity,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::JwtConfig;
        use crate::email::RecordingMailer;
        use crate::store::memory::MemoryStore;

        let config = Arc::new(AppConfig {
            backend: BackendKind::Postgres,
            database_url: None,
            redis_url: None,
            frontend_url: "http://localhost:8080".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                ttl_minutes: 30,
            },
            smtp: None,
        });
        Self {
            store: Arc::new(MemoryStore::new()),
            config,
            mailer: Arc::new(RecordingMailer::default()),
            identity: Arc::new(UnconfiguredProvider),
        }
    }
}
