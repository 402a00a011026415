use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub vapid: VapidConfig,
    pub push: PushConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the PWA frontend).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Shared HS256 secret used by the auth service that issues the tokens.
    pub secret: String,
}

/// Application server identity for Web Push (VAPID).
///
/// Loaded once at startup and handed to the delivery client; nothing else
/// holds signing material.
#[derive(Debug, Clone, Deserialize)]
pub struct VapidConfig {
    /// Uncompressed P-256 public key, base64url encoded. Served to browsers as
    /// the `applicationServerKey`.
    pub public_key: String,
    /// Raw P-256 private scalar, base64url encoded.
    pub private_key: String,
    /// Contact for the push service operator (`mailto:` or `https:` URL).
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Upper bound for a single request to a push service.
    pub timeout_seconds: u64,
    /// How long the push service should keep an undelivered message.
    pub ttl_seconds: u32,
    /// Title used when a fanout request does not provide one.
    pub default_title: String,
    pub default_icon: String,
    pub default_badge: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for unauthenticated endpoints
    /// (VAPID public key, delivery acknowledgment)
    pub public_per_second: u32,
    /// Burst size for unauthenticated endpoints
    pub public_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduled notification dispatcher runs.
    pub enabled: bool,
    /// How often (seconds) the dispatcher polls for due notifications.
    pub poll_interval_seconds: u64,
    /// Maximum notifications claimed per poll.
    pub batch_size: u32,
    /// Age (seconds) after which an unsettled claim is taken over again.
    pub claim_timeout_seconds: u64,
}

fn parse_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.server.frontend_url),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            vapid: VapidConfig {
                public_key: env::var("VAPID_PUBLIC_KEY")
                    .map_err(|_| ConfigError::MissingEnv("VAPID_PUBLIC_KEY".to_string()))?,
                private_key: env::var("VAPID_PRIVATE_KEY")
                    .map_err(|_| ConfigError::MissingEnv("VAPID_PRIVATE_KEY".to_string()))?,
                subject: env::var("VAPID_SUBJECT").unwrap_or(defaults.vapid.subject),
            },
            push: PushConfig {
                timeout_seconds: parse_or("PUSH_TIMEOUT_SECONDS", defaults.push.timeout_seconds),
                ttl_seconds: parse_or("PUSH_TTL_SECONDS", defaults.push.ttl_seconds),
                default_title: env::var("PUSH_DEFAULT_TITLE")
                    .unwrap_or(defaults.push.default_title),
                default_icon: env::var("PUSH_DEFAULT_ICON").unwrap_or(defaults.push.default_icon),
                default_badge: env::var("PUSH_DEFAULT_BADGE")
                    .unwrap_or(defaults.push.default_badge),
            },
            rate_limit: RateLimitConfig {
                public_per_second: parse_or(
                    "RATE_LIMIT_PUBLIC_PER_SECOND",
                    defaults.rate_limit.public_per_second,
                ),
                public_burst: parse_or("RATE_LIMIT_PUBLIC_BURST", defaults.rate_limit.public_burst),
            },
            scheduler: SchedulerConfig {
                enabled: parse_bool("SCHEDULER_ENABLED", defaults.scheduler.enabled),
                poll_interval_seconds: parse_or(
                    "SCHEDULER_POLL_INTERVAL_SECONDS",
                    defaults.scheduler.poll_interval_seconds,
                ),
                batch_size: parse_or("SCHEDULER_BATCH_SIZE", defaults.scheduler.batch_size),
                claim_timeout_seconds: parse_or(
                    "SCHEDULER_CLAIM_TIMEOUT_SECONDS",
                    defaults.scheduler.claim_timeout_seconds,
                ),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                frontend_url: "http://localhost:5173".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/push.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            vapid: VapidConfig {
                public_key: String::new(),
                private_key: String::new(),
                subject: "mailto:admin@example.com".to_string(),
            },
            push: PushConfig {
                timeout_seconds: 10,
                ttl_seconds: 24 * 60 * 60,
                default_title: "Cardeneta App".to_string(),
                default_icon: "/pwa-192x192.png".to_string(),
                default_badge: "/pwa-192x192.png".to_string(),
            },
            rate_limit: RateLimitConfig {
                public_per_second: 5,
                public_burst: 20,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                poll_interval_seconds: 30,
                batch_size: 50,
                claim_timeout_seconds: 300,
            },
        }
    }
}
