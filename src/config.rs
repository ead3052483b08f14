use crate::ip_geo::IpLookupConfig;
use crate::non_zero_duration::NonZeroDuration;
use crate::store::DatabaseConfig;

use hyper::header::HeaderMap;
use serde::Deserialize;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error(r#"threads must be a positive integer or "cores", not {0:?}"#)]
    Threads(String),
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,
    #[serde(default)]
    pub threads: ConfigThreads,
    #[serde(default = "Config::default_ip_headers")]
    pub ip_headers: Vec<String>,
    #[serde(default = "Config::default_ip_headers_recursive")]
    pub ip_headers_recursive: bool,
    #[serde(default = "Config::default_bridge_timeout")]
    pub bridge_timeout: NonZeroDuration,
    #[serde(default = "Config::default_log_level")]
    pub log_level: log::Level,
    #[serde(default, with = "http_serde::header_map")]
    pub response_headers: HeaderMap,
    #[serde(default)]
    pub ip_lookup: IpLookupConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    fn default_host() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8080))
    }

    pub fn default_ip_headers() -> Vec<String> {
        vec![
            "X-Forwarded-For".into(),
            "X-Real-IP".into(),
            "CF-Connecting-IP".into(),
            "True-Client-IP".into(),
        ]
    }

    fn default_ip_headers_recursive() -> bool {
        true
    }

    fn default_bridge_timeout() -> NonZeroDuration {
        NonZeroDuration::from_secs(15).unwrap()
    }

    fn default_log_level() -> log::Level {
        log::Level::Info
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ConfigThreadsDe")]
pub enum ConfigThreads {
    #[default]
    Cores,
    Custom(NonZeroUsize),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigThreadsDe {
    Number(usize),
    Name(String),
}

impl TryFrom<ConfigThreadsDe> for ConfigThreads {
    type Error = ConfigError;

    fn try_from(value: ConfigThreadsDe) -> Result<Self, Self::Error> {
        match value {
            ConfigThreadsDe::Number(threads) => NonZeroUsize::new(threads)
                .map(Self::Custom)
                .ok_or_else(|| ConfigError::Threads(threads.to_string())),
            ConfigThreadsDe::Name(name) if name.eq_ignore_ascii_case("cores") => Ok(Self::Cores),
            ConfigThreadsDe::Name(name) => Err(ConfigError::Threads(name)),
        }
    }
}

pub fn parse_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let toml_string = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&toml_string)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_geo::IpGeoProviderTrait;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.host, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.threads, ConfigThreads::Cores);
        assert_eq!(config.ip_headers, Config::default_ip_headers());
        assert!(config.ip_headers_recursive);
        assert_eq!(Duration::from(config.bridge_timeout), Duration::from_secs(15));
        assert_eq!(config.log_level, log::Level::Info);
        assert!(config.response_headers.is_empty());
        let sources: Vec<_> = config
            .ip_lookup
            .providers
            .iter()
            .map(|provider| provider.source())
            .collect();
        assert_eq!(sources, ["ipapi.co", "ipinfo.io"]);
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.collection, "locations");
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            host = "0.0.0.0:80"
            threads = 4
            ip_headers = ["X-Real-IP"]
            ip_headers_recursive = false
            bridge_timeout = 30
            log_level = "warn"

            [response_headers]
            Cache-Control = "no-store"

            [ip_lookup]
            request_timeout = 3
            echo = "http://127.0.0.1:9000/ip"
            providers = [
                { type = "ipinfo.io", uri = "http://127.0.0.1:9001" },
                { type = "ipapi" },
            ]

            [database]
            url = "sqlite://checkins.db"
            collection = "visits"
            connect_timeout = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "0.0.0.0:80".parse().unwrap());
        assert_eq!(config.threads, ConfigThreads::Custom(4.try_into().unwrap()));
        assert_eq!(config.ip_headers, vec!["X-Real-IP".to_string()]);
        assert!(!config.ip_headers_recursive);
        assert_eq!(config.log_level, log::Level::Warn);
        assert_eq!(config.response_headers["cache-control"], "no-store");
        assert_eq!(
            Duration::from(config.ip_lookup.request_timeout),
            Duration::from_secs(3)
        );
        assert_eq!(config.ip_lookup.echo.to_string(), "http://127.0.0.1:9000/ip");
        let provider = &config.ip_lookup.providers[0];
        assert_eq!(provider.source(), "ipinfo.io");
        assert_eq!(
            provider.lookup_uri(None).unwrap().to_string(),
            "http://127.0.0.1:9001/json"
        );
        assert_eq!(config.ip_lookup.providers[1].source(), "ipapi.co");
        assert_eq!(config.database.url.as_deref(), Some("sqlite://checkins.db"));
        assert_eq!(config.database.collection, "visits");
    }

    #[test]
    fn threads_by_name() {
        let config: Config = toml::from_str(r#"threads = "cores""#).unwrap();
        assert_eq!(config.threads, ConfigThreads::Cores);
        assert!(toml::from_str::<Config>("threads = 0").is_err());
        assert!(toml::from_str::<Config>(r#"threads = "many""#).is_err());
    }

    #[test]
    fn invalid_configs() {
        for toml_string in [
            r#"bridge_timeout = 0"#,
            "[ip_lookup]\nproviders = [{ type = \"maxmind\" }]",
            "[database]\nuser = \"root\"",
            r#"log_level = "loud""#,
        ] {
            assert!(toml::from_str::<Config>(toml_string).is_err(), "{toml_string}");
        }
    }
}
