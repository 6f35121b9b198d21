use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    /// Stamp `last_login` on successful login.
    pub update_last_login: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Superuser provisioned at startup when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    /// `None` keeps media payloads in memory.
    pub s3: Option<S3Config>,
    pub admin: Option<AdminConfig>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_opt("JWT_ISSUER").unwrap_or_else(|| "socialhub".into()),
            audience: env_opt("JWT_AUDIENCE").unwrap_or_else(|| "socialhub-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 5),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24),
            update_last_login: env_parse("JWT_UPDATE_LAST_LOGIN", false),
        };

        let s3 = match (
            env_opt("MINIO_ENDPOINT"),
            env_opt("MINIO_BUCKET"),
            env_opt("MINIO_ACCESS_KEY"),
            env_opt("MINIO_SECRET_KEY"),
        ) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => Some(S3Config {
                endpoint,
                bucket,
                access_key,
                secret_key,
                region: env_opt("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
            }),
            _ => None,
        };

        let admin = match (
            env_opt("ADMIN_USERNAME"),
            env_opt("ADMIN_EMAIL"),
            env_opt("ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminConfig {
                username,
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            database_url: env_opt("DATABASE_URL"),
            jwt,
            s3,
            admin,
        })
    }
}
