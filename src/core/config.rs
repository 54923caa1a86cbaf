use serde::{Deserialize, Serialize};

/// Top-level application configuration.
///
/// The service is environment-configured: `AppConfig::load()` starts from
/// the documented defaults and applies `APP_*` / `S3_*` / `REDIS_*`
/// overrides field by field. Unknown or unparsable values keep the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub upload: UploadConfig,
    pub cache: CacheConfig,
    pub s3: S3Config,
    pub redis: RedisConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:3000".
    pub address: String,
}

/// Admission and upstream-fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Hostname allow-list; empty list allows every origin.
    /// Entries are exact hostnames or `*` wildcard patterns.
    pub allowed_origins: Vec<String>,
    /// Default for the `webp` flag when a request does not set it.
    pub webp_by_default: bool,
    /// Process-wide admission token (multi-part init/status, image upload).
    pub token: String,
    /// HMAC-SHA256 secret for request signatures. Empty = unset.
    pub hmac_key: String,
    /// Overall upstream request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Capacity of the parsed-URL cache used by origin validation.
    pub url_cache_size: usize,
    /// Maximum source image size in MB (0 = unlimited).
    pub max_image_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Master switch for the upload endpoints.
    pub enabled: bool,
    /// Multi-part chunk size in bytes.
    pub chunk_size: u64,
    /// Maximum video upload size in MB (0 = unlimited).
    pub max_video_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for transformed artifacts in seconds.
    pub ttl_secs: u64,
    /// Memory-cache cost budget in bytes.
    pub max_cost: u64,
    /// TTL for the HTTP response cache in seconds.
    pub http_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub enabled: bool,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub ssl: bool,
    /// Key prefix for every object written or read by this service.
    pub prefix: String,
}

impl S3Config {
    /// Enabled but missing endpoint/credentials/bucket degrades to disabled.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && !self.endpoint.is_empty()
            && !self.access_key_id.is_empty()
            && !self.secret_access_key.is_empty()
            && !self.bucket.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub enabled: bool,
    pub addr: String,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.addr.is_empty()
    }

    /// Connection URL in `redis://[:password@]addr/db` form.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "json" or "text".
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration: defaults overridden by environment variables.
    pub fn load() -> Self {
        let mut config = Self::default();
        Self::apply_env_overrides(&mut config);
        config
    }

    fn apply_env_overrides(config: &mut AppConfig) {
        if let Ok(v) = std::env::var("APP_ADDRESS") {
            config.server.address = v;
        }
        if let Ok(v) = std::env::var("APP_ALLOWED_ORIGINS") {
            config.proxy.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("APP_WEBP") {
            if let Ok(b) = v.parse() {
                config.proxy.webp_by_default = b;
            }
        }
        if let Ok(v) = std::env::var("APP_TOKEN") {
            config.proxy.token = v;
        }
        if let Ok(v) = std::env::var("APP_HMAC_KEY") {
            config.proxy.hmac_key = v;
        }
        if let Ok(v) = std::env::var("APP_HTTP_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                config.proxy.http_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("APP_URL_CACHE_SIZE") {
            if let Ok(n) = v.parse() {
                config.proxy.url_cache_size = n;
            }
        }
        if let Ok(v) = std::env::var("APP_MAX_IMAGE_SIZE_MB") {
            if let Ok(n) = v.parse() {
                config.proxy.max_image_size_mb = n;
            }
        }
        if let Ok(v) = std::env::var("APP_UPLOADING_ENABLED") {
            if let Ok(b) = v.parse() {
                config.upload.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("APP_CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                config.upload.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("APP_MAX_VIDEO_SIZE_MB") {
            if let Ok(n) = v.parse() {
                config.upload.max_video_size_mb = n;
            }
        }
        if let Ok(v) = std::env::var("APP_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                config.cache.ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("APP_CACHE_MAX_COST") {
            if let Ok(n) = v.parse() {
                config.cache.max_cost = n;
            }
        }
        if let Ok(v) = std::env::var("APP_HTTP_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                config.cache.http_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("S3_ENABLED") {
            if let Ok(b) = v.parse() {
                config.s3.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("S3_ENDPOINT") {
            config.s3.endpoint = v;
        }
        if let Ok(v) = std::env::var("S3_ACCESS_KEY_ID") {
            config.s3.access_key_id = v;
        }
        if let Ok(v) = std::env::var("S3_SECRET_ACCESS_KEY") {
            config.s3.secret_access_key = v;
        }
        if let Ok(v) = std::env::var("S3_BUCKET") {
            config.s3.bucket = v;
        }
        if let Ok(v) = std::env::var("S3_SSL") {
            if let Ok(b) = v.parse() {
                config.s3.ssl = b;
            }
        }
        if let Ok(v) = std::env::var("S3_PREFIX") {
            config.s3.prefix = v;
        }
        if let Ok(v) = std::env::var("REDIS_ENABLED") {
            if let Ok(b) = v.parse() {
                config.redis.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("REDIS_ADDR") {
            config.redis.addr = v;
        }
        if let Ok(v) = std::env::var("REDIS_PASSWORD") {
            config.redis.password = v;
        }
        if let Ok(v) = std::env::var("REDIS_DB") {
            if let Ok(n) = v.parse() {
                config.redis.db = n;
            }
        }
        if let Ok(v) = std::env::var("APP_LOG_LEVEL") {
            config.observability.log_level = v;
        }
        if let Ok(v) = std::env::var("APP_LOG_FORMAT") {
            config.observability.log_format = v;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                address: "0.0.0.0:3000".to_string(),
            },
            proxy: ProxyConfig {
                allowed_origins: Vec::new(),
                webp_by_default: false,
                token: String::new(),
                hmac_key: String::new(),
                http_timeout_secs: 30,
                url_cache_size: 1000,
                max_image_size_mb: 0,
            },
            upload: UploadConfig {
                enabled: false,
                chunk_size: 80 * 1024 * 1024,
                max_video_size_mb: 0,
            },
            cache: CacheConfig {
                ttl_secs: 3600,
                max_cost: 512 * 1024 * 1024,
                http_ttl_secs: 600,
            },
            s3: S3Config {
                enabled: false,
                endpoint: String::new(),
                access_key_id: String::new(),
                secret_access_key: String::new(),
                bucket: String::new(),
                ssl: true,
                prefix: String::new(),
            },
            redis: RedisConfig {
                enabled: false,
                addr: String::new(),
                password: String::new(),
                db: 0,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "text".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_usable_requires_full_credentials() {
        let mut s3 = S3Config {
            enabled: true,
            endpoint: "minio:9000".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
            bucket: "media".to_string(),
            ssl: false,
            prefix: String::new(),
        };
        assert!(s3.is_usable());

        s3.bucket.clear();
        assert!(!s3.is_usable());

        s3.bucket = "media".to_string();
        s3.enabled = false;
        assert!(!s3.is_usable());
    }

    #[test]
    fn redis_url_with_and_without_password() {
        let mut redis = RedisConfig {
            enabled: true,
            addr: "localhost:6379".to_string(),
            password: String::new(),
            db: 2,
        };
        assert_eq!(redis.url(), "redis://localhost:6379/2");

        redis.password = "hunter2".to_string();
        assert_eq!(redis.url(), "redis://:hunter2@localhost:6379/2");
    }

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.upload.chunk_size, 80 * 1024 * 1024);
        assert_eq!(config.cache.http_ttl_secs, 600);
        assert_eq!(config.proxy.http_timeout_secs, 30);
        assert!(config.proxy.allowed_origins.is_empty());
    }
}
