use std::net::IpAddr;

use reqwest::{Client, Method, Response};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};

const MAX_REDIRECTS: u8 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// HTTP client for requests to tenant-supplied URLs (webhook delivery
/// targets, flow step callbacks). Every hop — the initial request and each
/// redirect — is checked against the SSRF policy before it is dialed,
/// since a server can 302 a first, innocuous-looking URL to an internal
/// address.
pub struct SafeHttpClient {
    inner: Client,
}

impl SafeHttpClient {
    pub fn new() -> Result<Self> {
        let inner = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { inner })
    }

    /// Sends `method url` with `body`, following up to [`MAX_REDIRECTS`]
    /// redirects manually so each hop gets its own SSRF check.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let mut current = Url::parse(url)?;
        let mut redirects = 0u8;

        loop {
            ssrf_check(&current).await?;

            let mut request = self.inner.request(method.clone(), current.clone());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let response = request.send().await?;

            if response.status().is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(Error::Message(format!(
                        "too many redirects fetching {url}"
                    )));
                }
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Ok(response);
                };
                current = current.join(location)?;
                continue;
            }

            return Ok(response);
        }
    }
}

impl Default for SafeHttpClient {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        Self::new().expect("building the default reqwest client should never fail")
    }
}

/// Rejects a URL whose host resolves (directly or via DNS) to a private,
/// loopback, link-local, or otherwise non-routable address. Checked before
/// every dial, including redirect hops.
pub async fn ssrf_check(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::NoHost(url.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(Error::SsrfBlocked(format!("{host} is a private IP")));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{host}:{port}"))
        .await
        .map_err(|_| Error::DnsResolutionFailed(host.clone()))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::DnsResolutionFailed(host));
    }

    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            warn!(host = %host, ip = %addr.ip(), "ssrf_check blocked resolved address");
            return Err(Error::SsrfBlocked(format!(
                "{host} resolves to private IP {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

/// True for loopback, RFC1918/RFC4193, link-local, CGNAT, broadcast, and
/// unspecified addresses in both IPv4 and IPv6.
#[must_use]
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24 (IETF protocol assignments)
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
        }
    }
}

/// Strips an optional port and brackets, then checks whether `host`
/// addresses the local machine by name. Used as a cheap pre-dial check
/// before DNS resolution even happens.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.split(':').next().unwrap_or(host);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    host.eq_ignore_ascii_case("localhost")
        || host == "127.0.0.1"
        || host == "::1"
        || host.to_ascii_lowercase().ends_with(".localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_v4() {
        assert!(is_private_ip(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(is_private_ip(&"10.0.0.5".parse().unwrap()));
        assert!(is_private_ip(&"192.168.1.1".parse().unwrap()));
        assert!(is_private_ip(&"172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn rejects_link_local_and_cgnat() {
        assert!(is_private_ip(&"169.254.1.1".parse().unwrap()));
        assert!(is_private_ip(&"100.64.0.1".parse().unwrap()));
    }

    #[test]
    fn accepts_public_v4() {
        assert!(!is_private_ip(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn rejects_ipv6_loopback_and_unique_local() {
        assert!(is_private_ip(&"::1".parse().unwrap()));
        assert!(is_private_ip(&"fc00::1".parse().unwrap()));
        assert!(is_private_ip(&"fe80::1".parse().unwrap()));
    }

    #[test]
    fn loopback_host_variants() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("localhost:8080"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("[::1]"));
        assert!(is_loopback_host("foo.localhost"));
        assert!(!is_loopback_host("example.com"));
    }

    #[tokio::test]
    async fn ssrf_check_blocks_literal_private_ip() {
        let url = Url::parse("http://127.0.0.1/webhook").unwrap();
        let err = ssrf_check(&url).await.unwrap_err();
        assert!(matches!(err, Error::SsrfBlocked(_)));
    }
}
