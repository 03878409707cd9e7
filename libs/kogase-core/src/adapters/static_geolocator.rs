use crate::{GeoLocator, domain::device::UNKNOWN_COUNTRY};
use async_trait::async_trait;
use std::net::IpAddr;

/// Answers every routable address with one fixed country. Backs the
/// in-memory mode and the route tests, where no outbound calls are made.
#[derive(Debug, Clone)]
pub struct StaticGeoLocator {
    country: String,
}

impl StaticGeoLocator {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
        }
    }
}

impl Default for StaticGeoLocator {
    fn default() -> Self {
        Self::new(UNKNOWN_COUNTRY)
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn country_of(&self, ip: &str) -> String {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) if !addr.is_loopback() && !addr.is_unspecified() => self.country.clone(),
            _ => UNKNOWN_COUNTRY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_country_for_routable_addresses() {
        let geo = StaticGeoLocator::new("SE");
        assert_eq!(geo.country_of("203.0.113.7").await, "SE");
        assert_eq!(geo.country_of("127.0.0.1").await, UNKNOWN_COUNTRY);
        assert_eq!(geo.country_of("").await, UNKNOWN_COUNTRY);
    }
}
