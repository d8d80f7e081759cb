use std::env;
use std::time::Duration;

use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OctoPrintConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    /// Upper bound for one REST request, connect included.
    pub request_timeout: Duration,
}

impl Default for OctoPrintConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://127.0.0.1:5000/").expect("static url"),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl OctoPrintConfig {
    pub fn from_env() -> Self {
        let mut cfg = OctoPrintConfig::default();

        if let Ok(v) = env::var("OCTOPRINT_URL") {
            match normalized_url(&v) {
                Some(url) => cfg.base_url = url,
                None => tracing::warn!(value = %v, "Ignoring invalid OCTOPRINT_URL"),
            }
        }
        if let Ok(v) = env::var("OCTOPRINT_API_KEY") {
            if !v.is_empty() {
                cfg.api_key = Some(v);
            }
        }
        if let Ok(v) = env::var("OCTOPRINT_TIMEOUT_SECS") {
            match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %v, "Ignoring invalid OCTOPRINT_TIMEOUT_SECS"),
            }
        }

        cfg
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    /// Raw push socket (`/sockjs/websocket`) on the matching ws/wss scheme.
    pub fn push_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join("sockjs/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) stays within the special schemes and cannot fail
        let _ = url.set_scheme(scheme);
        Ok(url)
    }
}

// `join` drops the last path segment unless the base ends with a slash.
fn normalized_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_slash = if trimmed.ends_with('/') { trimmed.to_string() } else { format!("{trimmed}/") };
    Url::parse(&with_slash).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() {
        let cfg = OctoPrintConfig {
            base_url: normalized_url("http://pi.local/octoprint").unwrap(),
            ..OctoPrintConfig::default()
        };
        assert_eq!(cfg.endpoint("api/job").unwrap().as_str(), "http://pi.local/octoprint/api/job");
    }

    #[test]
    fn push_url_switches_scheme() {
        let cfg = OctoPrintConfig { base_url: normalized_url("https://pi.local").unwrap(), ..OctoPrintConfig::default() };
        assert_eq!(cfg.push_url().unwrap().as_str(), "wss://pi.local/sockjs/websocket");
        assert_eq!(OctoPrintConfig::default().push_url().unwrap().as_str(), "ws://127.0.0.1:5000/sockjs/websocket");
    }

    #[test]
    fn rejects_garbage_urls() {
        assert!(normalized_url("").is_none());
        assert!(normalized_url("not a url").is_none());
    }
}
