pub use error::ResolveError;
pub use ipapi::IpApiProvider;
pub use ipinfo::IpInfoProvider;

pub mod echo;
mod error;
pub mod ipapi;
pub mod ipinfo;

use crate::non_zero_duration::NonZeroDuration;
use crate::record::LocationRecord;

use enum_dispatch::enum_dispatch;
use hyper::body::{Body, Bytes};
use hyper::client::{Client, HttpConnector};
use hyper::header::{ACCEPT, USER_AGENT};
use hyper::http::uri::{InvalidUri, Uri};
use hyper::Request;
use hyper_tls::HttpsConnector;
use serde::Deserialize;
use smallvec::SmallVec;
use std::net::IpAddr;
use std::time::Duration;

pub type HttpClient = Client<HttpsConnector<HttpConnector>>;

const USER_AGENT_VALUE: &str = concat!("geocheckin/", env!("CARGO_PKG_VERSION"));

pub(crate) fn base_string(uri: &Uri) -> String {
    uri.to_string().trim_end_matches('/').to_owned()
}

#[derive(Deserialize)]
#[serde(try_from = "ProviderConfig")]
#[enum_dispatch]
pub enum IpGeoProvider {
    IpApi(IpApiProvider),
    IpInfo(IpInfoProvider),
}

/// A third-party IP-to-location service
#[enum_dispatch(IpGeoProvider)]
pub trait IpGeoProviderTrait: Send + Sync {
    fn source(&self) -> &'static str;
    /// Lookup address for `ip`, or for the requester itself when `ip` is `None`
    fn lookup_uri(&self, ip: Option<IpAddr>) -> Result<Uri, ResolveError>;
    fn parse_response(&self, body: &[u8], ip: Option<IpAddr>) -> Result<LocationRecord, ResolveError>;
}

#[derive(Deserialize)]
#[serde(tag = "type")]
#[serde(deny_unknown_fields)]
enum ProviderConfig {
    #[serde(alias = "ipapi", alias = "ipapi.co")]
    IpApi {
        #[serde(default)]
        uri: Option<String>,
    },
    #[serde(alias = "ipinfo", alias = "ipinfo.io")]
    IpInfo {
        #[serde(default)]
        uri: Option<String>,
    },
}

impl TryFrom<ProviderConfig> for IpGeoProvider {
    type Error = InvalidUri;

    fn try_from(value: ProviderConfig) -> Result<Self, Self::Error> {
        match value {
            ProviderConfig::IpApi { uri } => {
                let uri = uri.map(|s| s.parse()).transpose()?;
                Ok(IpApiProvider::new(uri).into())
            }
            ProviderConfig::IpInfo { uri } => {
                let uri = uri.map(|s| s.parse()).transpose()?;
                Ok(IpInfoProvider::new(uri).into())
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpLookupConfig {
    #[serde(default = "IpLookupConfig::default_request_timeout")]
    pub request_timeout: NonZeroDuration,
    #[serde(default = "echo::default_echo_uri", with = "http_serde::uri")]
    pub echo: Uri,
    #[serde(default = "IpLookupConfig::default_providers")]
    pub providers: Vec<IpGeoProvider>,
}

impl IpLookupConfig {
    fn default_request_timeout() -> NonZeroDuration {
        NonZeroDuration::from_secs(10).unwrap()
    }

    fn default_providers() -> Vec<IpGeoProvider> {
        vec![
            IpApiProvider::default().into(),
            IpInfoProvider::default().into(),
        ]
    }
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        Self {
            request_timeout: Self::default_request_timeout(),
            echo: echo::default_echo_uri(),
            providers: Self::default_providers(),
        }
    }
}

/// Resolves an approximate location from a client address through a chain of providers.
/// The first provider that answers wins.
pub struct IpResolver {
    client: HttpClient,
    providers: SmallVec<[IpGeoProvider; 2]>,
    echo: Uri,
    request_timeout: Duration,
}

impl IpResolver {
    pub fn from_config(config: IpLookupConfig) -> Self {
        let https = HttpsConnector::new();
        let client = Client::builder().build::<_, Body>(https);
        Self {
            client,
            providers: config.providers.into_iter().collect(),
            echo: config.echo,
            request_timeout: config.request_timeout.into(),
        }
    }

    pub async fn resolve(&self, client_ip: Option<IpAddr>) -> Result<LocationRecord, ResolveError> {
        let ip = match client_ip {
            Some(ip) => Some(ip),
            None => match self.echo_ip().await {
                Ok(ip) => Some(ip),
                Err(err) => {
                    log::warn!(r#"Cannot determine client IP via "{}": {err}"#, self.echo);
                    None
                }
            },
        };

        let mut last_error = ResolveError::NoProviders;
        for provider in &self.providers {
            match self.lookup(provider, ip).await {
                Ok(record) => return Ok(record),
                Err(err) => {
                    log::warn!("{} failed to locate {ip:?}: {err}", provider.source());
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn echo_ip(&self) -> Result<IpAddr, ResolveError> {
        let body = self.get(self.echo.clone()).await?;
        echo::parse_echo_response(&body)
    }

    async fn lookup(
        &self,
        provider: &IpGeoProvider,
        ip: Option<IpAddr>,
    ) -> Result<LocationRecord, ResolveError> {
        let uri = provider.lookup_uri(ip)?;
        let body = self.get(uri).await?;
        provider.parse_response(&body, ip)
    }

    async fn get(&self, uri: Uri) -> Result<Bytes, ResolveError> {
        let request = Request::builder()
            .uri(uri)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .body(Body::empty())?;
        let fetch = async {
            let response = self.client.request(request).await?;
            if !response.status().is_success() {
                return Err(ResolveError::from(response.status()));
            }
            let body = hyper::body::to_bytes(response.into_body()).await?;
            Ok::<_, ResolveError>(body)
        };
        tokio::time::timeout(self.request_timeout, fetch)
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}
