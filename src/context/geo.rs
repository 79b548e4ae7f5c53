use serde::{Deserialize, Serialize};

use crate::db::IpLogEntry;

/// Geolocation of a caller address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub ip_address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Subset of the ipinfo.io response body
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    loc: Option<String>,
}

impl GeoInfo {
    /// Address only, every location field unknown
    pub fn null(ip_address: Option<String>) -> Self {
        Self {
            ip_address,
            ..Default::default()
        }
    }

    /// Parse an ipinfo.io JSON body. A body without a usable `loc` is
    /// treated as a failed lookup and keeps only the address.
    pub fn from_ipinfo(ip: &str, body: &str) -> Self {
        let parsed: IpInfoResponse = match serde_json::from_str(body) {
            Ok(p) => p,
            Err(_) => return Self::null(Some(ip.to_string())),
        };

        let Some((latitude, longitude)) = parsed.loc.as_deref().and_then(parse_loc) else {
            return Self::null(Some(ip.to_string()));
        };

        Self {
            ip_address: Some(ip.to_string()),
            city: parsed.city,
            region: parsed.region,
            country: parsed.country,
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// Row for `ip_logs`, if the address is known
    pub fn to_ip_log(&self) -> Option<IpLogEntry> {
        let ip_address = self.ip_address.clone()?;
        Some(IpLogEntry {
            ip_address,
            city: self.city.clone(),
            region: self.region.clone(),
            country: self.country.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

/// `"lat,lon"`
fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_response() {
        let geo = GeoInfo::from_ipinfo(
            "8.8.8.8",
            r#"{"ip":"8.8.8.8","city":"Mountain View","region":"California","country":"US","loc":"37.4056,-122.0775","org":"AS15169 Google LLC"}"#,
        );
        assert_eq!(geo.city.as_deref(), Some("Mountain View"));
        assert_eq!(geo.country.as_deref(), Some("US"));
        assert_eq!(geo.latitude, Some(37.4056));
        assert_eq!(geo.longitude, Some(-122.0775));
    }

    #[test]
    fn test_bad_loc_nulls_everything() {
        for body in [
            r#"{"city":"Leeds","country":"GB"}"#,
            r#"{"city":"Leeds","loc":"not-a-location"}"#,
            r#"{"city":"Leeds","loc":"53.8"}"#,
            "<html>rate limited</html>",
        ] {
            assert_eq!(
                GeoInfo::from_ipinfo("81.2.69.160", body),
                GeoInfo::null(Some("81.2.69.160".to_string())),
                "body: {body}"
            );
        }
    }

    #[test]
    fn test_ip_log_requires_address() {
        assert!(GeoInfo::null(None).to_ip_log().is_none());
        let entry = GeoInfo::null(Some("1.2.3.4".to_string())).to_ip_log().unwrap();
        assert_eq!(entry.ip_address, "1.2.3.4");
        assert_eq!(entry.city, None);
    }
}
