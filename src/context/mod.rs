//! Metadata about whoever is calling: where they are and what they are
//! calling from.
//!
//! Resolution never fails. Anything that cannot be determined comes back as
//! `None` and is stored as NULL.

mod device;
mod geo;

pub use device::{parse_user_agent, DeviceInfo};
pub use geo::GeoInfo;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;

use crate::config::GeoConfig;

/// Everything recorded about a caller at login
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub geo: GeoInfo,
    pub device: DeviceInfo,
}

/// Source of caller metadata, injected into the session manager
#[async_trait]
pub trait CallerContextResolver: Send + Sync {
    async fn resolve_context(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerContext;
}

/// Resolver backed by a public-IP service and an ipinfo-style geolocation API
pub struct HttpContextResolver {
    http_client: reqwest::Client,
    public_ip_url: String,
    geo_url: String,
}

impl HttpContextResolver {
    pub fn new(config: &GeoConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(format!("garaged/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            public_ip_url: config.public_ip_url.clone(),
            geo_url: config.geo_url.clone(),
        }
    }

    /// Caller address, swapping LAN addresses for this network's public one
    pub async fn resolve_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        let ip = client_ip_from_headers(headers, peer)?;
        if !is_private_address(&ip) {
            return Some(ip);
        }

        match self.public_ip().await {
            Ok(Some(public)) => Some(public.to_string()),
            Ok(None) => {
                debug!(ip = %ip, "Public address service did not return an address");
                Some(ip)
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "Public address lookup failed, keeping private address");
                Some(ip)
            }
        }
    }

    async fn public_ip(&self) -> Result<Option<IpAddr>, reqwest::Error> {
        let body = self
            .http_client
            .get(&self.public_ip_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim().parse().ok())
    }

    pub async fn geolocate(&self, ip: &str) -> GeoInfo {
        let url = self.geo_url.replace("{ip}", ip);

        let response = match self.http_client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(ip = %ip, error = %e, "Geolocation request failed");
                return GeoInfo::null(Some(ip.to_string()));
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!(ip = %ip, status = %response.status(), "Geolocation service returned an error");
            return GeoInfo::null(Some(ip.to_string()));
        }

        match response.text().await {
            Ok(body) => GeoInfo::from_ipinfo(ip, &body),
            Err(e) => {
                debug!(ip = %ip, error = %e, "Failed to read geolocation response");
                GeoInfo::null(Some(ip.to_string()))
            }
        }
    }
}

#[async_trait]
impl CallerContextResolver for HttpContextResolver {
    async fn resolve_context(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerContext {
        let geo = match self.resolve_ip(headers, peer).await {
            Some(ip) => self.geolocate(&ip).await,
            None => GeoInfo::null(None),
        };

        let device = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(parse_user_agent)
            .unwrap_or_default();

        CallerContext { geo, device }
    }
}

/// Client address by header precedence: `CF-Connecting-IP`, then the first
/// `X-Forwarded-For` hop, then the transport peer. A header that does not
/// hold an IP address is skipped.
pub fn client_ip_from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(ip) = header_value("cf-connecting-ip").and_then(|v| v.parse::<IpAddr>().ok()) {
        return Some(ip.to_string());
    }

    if let Some(ip) = header_value("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
    {
        return Some(ip.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Loopback and the LAN ranges this controller is deployed behind
pub fn is_private_address(ip: &str) -> bool {
    ip.starts_with("127.") || ip.starts_with("192.168.") || ip.starts_with("10.")
}
