use serde::Deserialize;

/// Persistence engine behind the user store, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Redis,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(BackendKind::Postgres),
            "redis" => Ok(BackendKind::Redis),
            other => anyhow::bail!("unknown store backend {other:?} (expected postgres or redis)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend: BackendKind = std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .parse()?;
        let database_url = std::env::var("DATABASE_URL").ok();
        let redis_url = std::env::var("REDIS_URL").ok();
        match backend {
            BackendKind::Postgres if database_url.is_none() => {
                anyhow::bail!("DATABASE_URL is required for the postgres backend")
            }
            BackendKind::Redis if redis_url.is_none() => {
                anyhow::bail!("REDIS_URL is required for the redis backend")
            }
            _ => {}
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(30),
        };

        // SMTP is optional: without it reset emails are logged and dropped.
        let smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_USERNAME"),
            std::env::var("SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(SmtpConfig {
                from: std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone()),
                host,
                username,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            backend,
            database_url,
            redis_url,
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            jwt,
            smtp,
        })
    }
}
