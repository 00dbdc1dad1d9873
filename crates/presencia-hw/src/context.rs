//! Where the verification page is running: its origin (for the
//! secure-context rule) and the browser (for remediation text).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("invalid origin {origin:?}: {reason}")]
    Invalid { origin: String, reason: &'static str },
}

/// Scheme, host and optional port of the page requesting the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    pub fn parse(s: &str) -> Result<Self, OriginError> {
        let invalid = |reason| OriginError::Invalid {
            origin: s.to_string(),
            reason,
        };

        let (scheme, rest) = s.trim().split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (addr, tail) = v6.split_once(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(p),
                None if tail.is_empty() => None,
                None => return Err(invalid("garbage after IPv6 host")),
            };
            (format!("[{addr}]"), port)
        } else {
            match authority.rsplit_once(':') {
                Some((h, p)) => (h.to_string(), Some(p)),
                None => (authority.to_string(), None),
            }
        };

        if host.is_empty() || host == "[]" {
            return Err(invalid("missing host"));
        }
        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| invalid("bad port")))
            .transpose()?;

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "[::1]")
    }

    /// Camera capture is only offered over HTTPS, except on loopback.
    pub fn is_secure(&self) -> bool {
        self.scheme == "https" || self.is_loopback()
    }
}

impl FromStr for Origin {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Browser {
    pub family: BrowserFamily,
    pub ios: bool,
    pub mobile: bool,
}

impl Browser {
    pub fn unknown() -> Self {
        Self {
            family: BrowserFamily::Unknown,
            ios: false,
            mobile: false,
        }
    }

    /// Best-effort classification from a user agent string.
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_ascii_lowercase();
        let has = |needle: &str| ua.contains(needle);

        let ios = has("iphone") || has("ipad") || has("ipod");
        let android = has("android");
        // Order matters: Edge and Chrome both also claim to be Safari.
        let family = if has("edg") {
            BrowserFamily::Edge
        } else if has("firefox") || has("fxios") {
            BrowserFamily::Firefox
        } else if has("chrome") || has("crios") {
            BrowserFamily::Chrome
        } else if has("safari") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Unknown
        };

        Self {
            family,
            ios,
            mobile: ios || android || has("mobile"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.family {
            BrowserFamily::Chrome => "Chrome",
            BrowserFamily::Edge => "Edge",
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::Safari => "Safari",
            BrowserFamily::Unknown => "unknown",
        }
    }
}

/// The page context a verification session runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub origin: Origin,
    pub browser: Browser,
}

impl ClientContext {
    pub fn new(origin: Origin, user_agent: &str) -> Self {
        Self {
            origin,
            browser: Browser::from_user_agent(user_agent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFARI_IOS: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const CHROME_DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const EDGE_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
    const FIREFOX_ANDROID: &str = "Mozilla/5.0 (Android 14; Mobile; rv:121.0) Gecko/121.0 Firefox/121.0";

    #[test]
    fn test_parse_origin_with_port() {
        let o = Origin::parse("HTTPS://Registro.Example.mx:8443/registro?x=1").unwrap();
        assert_eq!(o.scheme(), "https");
        assert_eq!(o.host(), "registro.example.mx");
        assert_eq!(o.port(), Some(8443));
        assert_eq!(o.to_string(), "https://registro.example.mx:8443");
    }

    #[test]
    fn test_parse_ipv6_loopback() {
        let o: Origin = "http://[::1]:3000".parse().unwrap();
        assert_eq!(o.host(), "[::1]");
        assert!(o.is_loopback());
        assert!(o.is_secure());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Origin::parse("localhost:3000").is_err());
        assert!(Origin::parse("http://").is_err());
        assert!(Origin::parse("http://host:notaport").is_err());
        assert!(Origin::parse("http://[::1").is_err());
    }

    #[test]
    fn test_secure_context_rule() {
        let secure = ["https://example.mx", "http://localhost:3000", "http://127.0.0.1"];
        let insecure = ["http://192.168.1.20:3000", "http://example.mx", "ftp://localhost.example"];
        for s in secure {
            assert!(Origin::parse(s).unwrap().is_secure(), "{s} should be secure");
        }
        for s in insecure {
            assert!(!Origin::parse(s).unwrap().is_secure(), "{s} should be insecure");
        }
    }

    #[test]
    fn test_browser_detection() {
        let safari = Browser::from_user_agent(SAFARI_IOS);
        assert_eq!(safari.family, BrowserFamily::Safari);
        assert!(safari.ios && safari.mobile);

        assert_eq!(Browser::from_user_agent(CHROME_DESKTOP).family, BrowserFamily::Chrome);
        assert!(!Browser::from_user_agent(CHROME_DESKTOP).mobile);
        assert_eq!(Browser::from_user_agent(EDGE_DESKTOP).family, BrowserFamily::Edge);

        let firefox = Browser::from_user_agent(FIREFOX_ANDROID);
        assert_eq!(firefox.family, BrowserFamily::Firefox);
        assert!(firefox.mobile && !firefox.ios);

        assert_eq!(Browser::from_user_agent(""), Browser::unknown());
    }
}
