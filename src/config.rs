use std::net::SocketAddr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Prefix used to build public image URLs, `{public_base_url}/{key}`.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of the hub's command queue (register/unregister/publish).
    pub command_buffer: usize,
    /// Per-viewer queue; a viewer whose queue is full gets dropped.
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            subscriber_buffer: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub db_max_connections: u32,
    pub storage: StorageConfig,
    pub hub: HubConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;

        let endpoint = env_or("MINIO_ENDPOINT", "http://localhost:9000");
        let bucket = env_or("MINIO_BUCKET", "mymeals");
        let public_base_url = std::env::var("IMAGE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            region: env_or("MINIO_REGION", "us-east-1"),
            endpoint,
            bucket,
            public_base_url,
        };

        let defaults = HubConfig::default();
        let hub = HubConfig {
            command_buffer: env_parse("HUB_COMMAND_BUFFER").unwrap_or(defaults.command_buffer),
            subscriber_buffer: env_parse("SUBSCRIBER_BUFFER")
                .unwrap_or(defaults.subscriber_buffer),
        };

        let server = ServerConfig {
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_parse("APP_PORT").unwrap_or(ServerConfig::default().port),
        };

        Ok(Self {
            server,
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            storage,
            hub,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_defaults_are_bounded() {
        let hub = HubConfig::default();
        assert!(hub.command_buffer > 0);
        assert!(hub.subscriber_buffer > 0);
    }

    #[test]
    fn server_addr_parses_host_and_port() {
        let addr = ServerConfig::default().addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8080");

        let bad = ServerConfig {
            host: "not a host".into(),
            port: 80,
        };
        assert!(bad.addr().is_err());
    }

    #[test]
    fn env_parse_ignores_garbage() {
        std::env::set_var("MYMEALS_TEST_NOT_A_NUMBER", "sixteen");
        assert_eq!(env_parse::<usize>("MYMEALS_TEST_NOT_A_NUMBER"), None);
        std::env::set_var("MYMEALS_TEST_A_NUMBER", "16");
        assert_eq!(env_parse::<usize>("MYMEALS_TEST_A_NUMBER"), Some(16));
    }
}
