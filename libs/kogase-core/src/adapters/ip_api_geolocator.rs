use crate::{CoreError, GeoLocator, domain::device::UNKNOWN_COUNTRY};
use async_trait::async_trait;
use serde::Deserialize;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, warn};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

/// Addresses that ip-api cannot place anywhere.
fn is_unroutable(ip: &IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return true;
    }
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_broadcast(),
        // fc00::/7 unique local, fe80::/10 link local
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Resolves countries through the ip-api.com JSON endpoint. Lookup failures
/// degrade to `"Unknown"` and are only logged.
#[derive(Debug, Clone)]
pub struct IpApiGeoLocator {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiGeoLocator {
    pub fn new(base_url: &str) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Configuration(format!("Invalid HTTP client settings: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn lookup(&self, ip: IpAddr) -> Result<String, reqwest::Error> {
        let url = format!("{}/json/{ip}", self.base_url);
        let body: IpApiResponse = self
            .client
            .get(url)
            .query(&[("fields", "status,country,countryCode")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.status != "success" {
            debug!("ip-api could not locate {}: status {}", ip, body.status);
            return Ok(UNKNOWN_COUNTRY.to_string());
        }
        Ok(body
            .country_code
            .filter(|c| !c.is_empty())
            .or(body.country.filter(|c| !c.is_empty()))
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()))
    }
}

#[async_trait]
impl GeoLocator for IpApiGeoLocator {
    async fn country_of(&self, ip: &str) -> String {
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            return UNKNOWN_COUNTRY.to_string();
        };
        if is_unroutable(&addr) {
            return UNKNOWN_COUNTRY.to_string();
        }
        match self.lookup(addr).await {
            Ok(country) => country,
            Err(e) => {
                warn!("Geolocation lookup for {} failed: {}", addr, e);
                UNKNOWN_COUNTRY.to_string()
            }
        }
    }
}
