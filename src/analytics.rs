use std::net::IpAddr;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use maxminddb::geoip2;
use regex::Regex;

use crate::models::analytics::PageView;

/// Referrer prefixes from local development that never count as traffic sources.
pub const REFERRER_DENYLIST: [&str; 5] = [
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "http://0.0.0.0",
    "http://[::1]",
];

fn localhost_ip() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(127(\.\d{1,3}){3}|::1|localhost|::ffff:127(\.\d{1,3}){3})$")
            .expect("localhost pattern is valid")
    })
}

/// Drop empty and loopback addresses.
pub fn sanitize_ip(raw: Option<&str>) -> Option<String> {
    let ip = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if localhost_ip().is_match(ip) {
        return None;
    }
    Some(ip.to_string())
}

fn is_local_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    host.contains("localhost")
        || host == "127.0.0.1"
        || host == "0.0.0.0"
        || host == "::1"
        || host.ends_with(".local")
}

/// Host of a referrer. Scheme-less values such as `localhost:5173/admin`
/// parse with `localhost` as the scheme, so they are retried as `http://`.
fn referrer_host(referrer: &str) -> Option<String> {
    fn host_of(s: &str) -> Option<String> {
        url::Url::parse(s)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }
    host_of(referrer).or_else(|| host_of(&format!("http://{}", referrer)))
}

/// Drop empty referrers and ones pointing at a local host. Referrers that do
/// not parse as URLs are kept as sent.
pub fn sanitize_referrer(raw: Option<&str>) -> Option<String> {
    let referrer = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match referrer_host(referrer) {
        Some(host) if is_local_host(&host) => None,
        _ => Some(referrer.to_string()),
    }
}

/// True for referrers excluded from the top-referrers report.
pub fn is_denied_referrer(referrer: &str) -> bool {
    let lower = referrer.to_ascii_lowercase();
    REFERRER_DENYLIST.iter().any(|p| lower.starts_with(p))
        || referrer_host(referrer).is_some_and(|h| is_local_host(&h))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAgentInfo {
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn parse_user_agent(ua: &str) -> UserAgentInfo {
    let Some(result) = woothee::parser::Parser::new().parse(ua) else {
        return UserAgentInfo::default();
    };
    let device_type = match result.category {
        "pc" => Some("desktop".to_string()),
        "smartphone" | "mobilephone" => Some("mobile".to_string()),
        "crawler" => Some("bot".to_string()),
        other => known(other),
    };
    UserAgentInfo {
        device_type,
        browser: known(result.name),
        os: known(result.os),
    }
}

/// Optional GeoLite2 City lookup. Without a database every lookup is empty.
pub struct GeoLookup {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl GeoLookup {
    pub fn disabled() -> Self {
        Self { reader: None }
    }

    /// Open the database at `path`. A missing or unreadable file disables lookups.
    pub fn open(path: Option<&str>) -> Self {
        let Some(path) = path.filter(|p| !p.trim().is_empty()) else {
            return Self::disabled();
        };
        if !Path::new(path).exists() {
            log::warn!("GeoIP database {} not found, geolocation disabled", path);
            return Self::disabled();
        }
        match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => {
                log::info!("GeoIP database loaded from {}", path);
                Self {
                    reader: Some(reader),
                }
            }
            Err(e) => {
                log::warn!("Cannot open GeoIP database {}: {}", path, e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    /// (country ISO code, English city name)
    pub fn lookup(&self, ip: &str) -> (Option<String>, Option<String>) {
        let (Some(reader), Ok(addr)) = (self.reader.as_ref(), ip.parse::<IpAddr>()) else {
            return (None, None);
        };
        let Ok(city) = reader.lookup::<geoip2::City>(addr) else {
            return (None, None);
        };
        let country = city
            .country
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string());
        let name = city
            .city
            .and_then(|c| c.names)
            .and_then(|names| names.get("en").map(|s| s.to_string()));
        (country, name)
    }
}

/// Assemble the stored event from what the client sent and what the request
/// revealed. `client_ip` is the raw address before localhost filtering.
pub fn build_page_view(
    path: &str,
    referrer: Option<&str>,
    user_agent: Option<&str>,
    client_ip: Option<&str>,
    geo: &GeoLookup,
    now: DateTime<Utc>,
) -> Result<PageView, String> {
    let path = path.trim();
    if path.is_empty() {
        return Err("path is required".to_string());
    }
    let ip = sanitize_ip(client_ip);
    let user_agent = user_agent
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    let ua = user_agent
        .as_deref()
        .map(parse_user_agent)
        .unwrap_or_default();
    let (country, city) = match ip.as_deref() {
        Some(addr) => geo.lookup(addr),
        None => (None, None),
    };
    Ok(PageView {
        path: path.to_string(),
        ip,
        user_agent,
        referrer: sanitize_referrer(referrer),
        device_type: ua.device_type,
        browser: ua.browser,
        os: ua.os,
        country,
        city,
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_sanitize_ip_localhost() {
        for ip in ["127.0.0.1", "127.8.9.10", "::1", "localhost", "LOCALHOST", "::ffff:127.0.0.1", " ", ""] {
            assert_eq!(sanitize_ip(Some(ip)), None, "{}", ip);
        }
        assert_eq!(sanitize_ip(None), None);
        assert_eq!(sanitize_ip(Some("203.0.113.9")).as_deref(), Some("203.0.113.9"));
        assert_eq!(sanitize_ip(Some("2001:db8::1")).as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn test_sanitize_referrer() {
        assert_eq!(sanitize_referrer(Some("http://localhost:5173/pricing")), None);
        assert_eq!(sanitize_referrer(Some("https://dev.localhost/")), None);
        assert_eq!(sanitize_referrer(Some("http://127.0.0.1/")), None);
        assert_eq!(sanitize_referrer(Some("http://0.0.0.0:8000/")), None);
        assert_eq!(sanitize_referrer(Some("http://[::1]:3000/")), None);
        assert_eq!(sanitize_referrer(Some("http://macbook.local/")), None);
        assert_eq!(sanitize_referrer(Some("")), None);
        assert_eq!(sanitize_referrer(Some("localhost:5173/admin")), None);
        assert_eq!(sanitize_referrer(Some("127.0.0.1:8080/pricing")), None);
        assert_eq!(
            sanitize_referrer(Some("www.google.com/search")).as_deref(),
            Some("www.google.com/search")
        );
        assert_eq!(
            sanitize_referrer(Some("https://www.google.com/")).as_deref(),
            Some("https://www.google.com/")
        );
        assert_eq!(sanitize_referrer(Some("android-app://com.google")).as_deref(), Some("android-app://com.google"));
    }

    #[test]
    fn test_denied_referrers() {
        assert!(is_denied_referrer("http://localhost:3000/"));
        assert!(is_denied_referrer("HTTPS://LOCALHOST/"));
        assert!(is_denied_referrer("http://[::1]/"));
        assert!(is_denied_referrer("https://printer.local/status"));
        assert!(is_denied_referrer("localhost:5173/admin"));
        assert!(is_denied_referrer("LOCALHOST/"));
        assert!(!is_denied_referrer("https://www.facebook.com/"));
    }

    #[test]
    fn test_parse_user_agent() {
        let desktop = parse_user_agent(CHROME_MAC);
        assert_eq!(desktop.device_type.as_deref(), Some("desktop"));
        assert_eq!(desktop.browser.as_deref(), Some("Chrome"));

        let phone = parse_user_agent(SAFARI_IPHONE);
        assert_eq!(phone.device_type.as_deref(), Some("mobile"));
        assert_eq!(phone.os.as_deref(), Some("iPhone"));

        assert_eq!(parse_user_agent(""), UserAgentInfo::default());
    }

    #[test]
    fn test_build_page_view() {
        let geo = GeoLookup::disabled();
        let view = build_page_view(
            " /services ",
            Some("http://localhost/"),
            Some(CHROME_MAC),
            Some("198.51.100.20"),
            &geo,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(view.path, "/services");
        assert_eq!(view.ip.as_deref(), Some("198.51.100.20"));
        assert_eq!(view.referrer, None);
        assert_eq!(view.device_type.as_deref(), Some("desktop"));
        assert_eq!(view.country, None);

        let local = build_page_view("/", None, None, Some("::1"), &geo, Utc::now()).unwrap();
        assert_eq!(local.ip, None);
        assert_eq!(local.user_agent, None);

        assert!(build_page_view("  ", None, None, None, &geo, Utc::now()).is_err());
    }

    #[test]
    fn test_geo_open_missing_file() {
        let geo = GeoLookup::open(Some("/nonexistent/GeoLite2-City.mmdb"));
        assert!(!geo.is_enabled());
        assert_eq!(geo.lookup("8.8.8.8"), (None, None));
        assert!(!GeoLookup::open(None).is_enabled());
    }
}
