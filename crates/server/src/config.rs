// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning knobs in
// `db::pool`; this module covers the core server settings.

/// Core server configuration.
///
/// Constructed via [`Config::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// HS256 signing secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub db_dsn: Option<String>,
    /// Deployment environment (`development`, `test`, `production`).
    pub environment: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Partition count per event-log topic.
    pub pubsub_partitions: usize,
    /// Log filter directive (e.g. `info`, `teamline_server=debug`).
    pub log_filter: String,
}

const DEFAULT_PORT: u16 = 3333;
const DEFAULT_PARTITIONS: usize = 4;

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `API_PORT` | `3333` |
    /// | `JWT_SECRET` | dev-only placeholder |
    /// | `DB_DSN` | *(none)* |
    /// | `ENV` | `development` |
    /// | `CORS_ORIGINS` | `http://localhost:3000` |
    /// | `PUBSUB_PARTITIONS` | `4` |
    /// | `LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let port = env("API_PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let jwt_secret = env("JWT_SECRET").unwrap_or_else(|_| "SECRET".into());
        let db_dsn = env("DB_DSN").ok().filter(|value| !value.trim().is_empty());
        let environment = env("ENV").unwrap_or_else(|_| "development".into());

        let cors_origins = env("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        let pubsub_partitions = env("PUBSUB_PARTITIONS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|partitions| *partitions > 0)
            .unwrap_or(DEFAULT_PARTITIONS);

        let log_filter = env("LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            port,
            jwt_secret,
            db_dsn,
            environment,
            cors_origins,
            pubsub_partitions,
            log_filter,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
