use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use strider_core::traits::{DownloadOutcome, Downloader};
use strider_core::{
    CrawlerError, FetchSettings, HttpRequest, HttpResponse, Mid, Module, ModuleBase, ModuleType,
    Request, Response, calculate_score_simple,
};
use url::Url;

use crate::throttle::{HostThrottle, ThrottleConfig};

const DEFAULT_USER_AGENT: &str = "Strider/0.1 (+crawler)";

/// Downloader module backed by reqwest.
///
/// SSRF protection is **enabled** by default: requests to private or
/// reserved IP ranges are refused. Use
/// [`allow_private_urls`](Self::allow_private_urls) to lift it when the
/// crawl targets hosts the operator controls.
pub struct ReqwestDownloader {
    base: ModuleBase,
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
    throttle: Option<HostThrottle>,
}

impl ReqwestDownloader {
    pub fn new(id: Mid) -> Result<Self, CrawlerError> {
        Self::with_settings(id, &FetchSettings::default())
    }

    /// Builds a downloader from fetch settings: user agent, timeout,
    /// politeness delay and SSRF protection.
    pub fn with_settings(id: Mid, settings: &FetchSettings) -> Result<Self, CrawlerError> {
        if id.module_type() != ModuleType::Downloader {
            return Err(CrawlerError::illegal_parameter(format!(
                "MID {id} does not identify a downloader"
            )));
        }
        let user_agent = settings.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CrawlerError::downloader(format!("couldn't build HTTP client: {e}")))?;

        let throttle = (settings.politeness_delay_ms > 0)
            .then(|| HostThrottle::new(ThrottleConfig::from_millis(settings.politeness_delay_ms)));

        Ok(Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            client,
            timeout_secs: settings.timeout_secs,
            ssrf_protection: !settings.allow_private_urls,
            throttle,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn with_throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = Some(HostThrottle::new(config));
        self
    }

    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, CrawlerError> {
        if self.ssrf_protection {
            validate_url(&request.url).await?;
        }
        if let Some(throttle) = &self.throttle {
            throttle.wait(&request.url).await;
        }

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            CrawlerError::downloader(format!("unsupported HTTP method: {}", request.method))
        })?;
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlerError::downloader(format!(
                    "request to {} timed out after {}s",
                    request.url, self.timeout_secs
                ))
            } else if e.is_connect() {
                CrawlerError::downloader(format!("connection failed: {e}"))
            } else {
                CrawlerError::downloader(e.to_string())
            }
        })?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlerError::downloader(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse {
            url,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl Module for ReqwestDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for ReqwestDownloader {
    async fn download(&self, request: Request) -> DownloadOutcome {
        let call = self.base.begin();
        let Some(http_req) = request.http_req() else {
            return DownloadOutcome::failed(CrawlerError::downloader(
                "illegal parameter: nil HTTP request",
            ));
        };
        call.accept();

        let http_resp = match self.fetch(http_req).await {
            Ok(http_resp) => http_resp,
            Err(e) => {
                tracing::debug!(url = %http_req.url, error = %e, "Download failed");
                return DownloadOutcome::failed(e);
            }
        };
        call.complete();

        let status = http_resp.status;
        let response = Response::new(http_resp, request.depth());
        if (200..300).contains(&status) {
            DownloadOutcome::ok(response)
        } else {
            let error = CrawlerError::downloader(format!("HTTP {status} for {}", http_req.url));
            DownloadOutcome::partial(response, error)
        }
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Refuses URLs whose host is, or resolves to, a private/reserved address.
async fn validate_url(url: &Url) -> Result<(), CrawlerError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(CrawlerError::downloader(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| CrawlerError::downloader(format!("URL {url} has no host")))?;
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(CrawlerError::downloader(format!(
                "SSRF blocked: {host} is a private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| CrawlerError::downloader(format!("DNS resolution failed for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(CrawlerError::downloader(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    if let Some(blocked) = addrs.iter().find(|addr| is_private_ip(addr.ip())) {
        return Err(CrawlerError::downloader(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }
    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // cloud metadata lives here
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64) // 100.64.0.0/10, carrier-grade NAT
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80 // link-local
                || (first & 0xFE00) == 0xFC00 // unique local
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::response::Html;
    use axum::routing::get;
    use strider_core::testutil::{mid, request};

    use super::*;

    async fn serve() -> String {
        let app = Router::new()
            .route("/", get(|| async { Html("<html><title>home</title></html>") }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, Html("<p>gone</p>")) }),
            )
            .route(
                "/ua",
                get(|headers: axum::http::HeaderMap| async move {
                    headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn local_downloader() -> ReqwestDownloader {
        ReqwestDownloader::new(mid("D1")).unwrap().allow_private_urls()
    }

    #[test]
    fn test_private_ipv4() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        for ip in ["::1", "::", "fe80::1", "fc00::1", "::ffff:169.254.169.254"] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_rejects_non_downloader_mid() {
        assert!(ReqwestDownloader::new(mid("A1")).is_err());
    }

    #[tokio::test]
    async fn test_validate_url_rejects_private_and_bad_scheme() {
        let err = validate_url(&Url::parse("http://169.254.169.254/latest/").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
        let err = validate_url(&Url::parse("http://[::1]:8080/").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
        let err = validate_url(&Url::parse("ftp://example.com/").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_ssrf_guard_blocks_loopback_download() {
        let base = serve().await;
        let downloader = ReqwestDownloader::new(mid("D1")).unwrap();
        let outcome = downloader.download(request(&format!("{base}/"), 0)).await;
        assert!(outcome.response.is_none());
        assert!(outcome.error.unwrap().to_string().contains("SSRF blocked"));
        assert_eq!(downloader.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_download_success() {
        let base = serve().await;
        let downloader = local_downloader();
        let outcome = downloader.download(request(&format!("{base}/"), 2)).await;

        assert!(outcome.error.is_none());
        let response = outcome.response.unwrap();
        assert_eq!(response.depth(), 2);
        let http = response.http_resp().unwrap();
        assert_eq!(http.status, 200);
        assert!(http.content_type().unwrap().contains("text/html"));
        assert!(http.text().contains("<title>home</title>"));

        let counts = downloader.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed), (1, 1, 1));
        assert_eq!(counts.handling, 0);
        assert_eq!(downloader.score(), 1 + 2 + 4);
    }

    #[tokio::test]
    async fn test_error_status_returns_partial_outcome() {
        let base = serve().await;
        let outcome = local_downloader()
            .download(request(&format!("{base}/missing"), 0))
            .await;
        assert_eq!(outcome.response.unwrap().http_resp().unwrap().status, 404);
        assert!(outcome.error.unwrap().to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_sends_configured_user_agent() {
        let base = serve().await;
        let settings = FetchSettings {
            user_agent: Some("strider-test".to_string()),
            allow_private_urls: true,
            ..FetchSettings::default()
        };
        let downloader = ReqwestDownloader::with_settings(mid("D1"), &settings).unwrap();
        let outcome = downloader.download(request(&format!("{base}/ua"), 0)).await;
        assert_eq!(outcome.response.unwrap().http_resp().unwrap().text(), "strider-test");
    }

    #[tokio::test]
    async fn test_missing_http_request_is_rejected() {
        let downloader = local_downloader();
        let outcome = downloader.download(Request::new(None::<HttpRequest>, 0)).await;
        assert!(outcome.response.is_none());
        assert!(outcome.error.unwrap().to_string().contains("nil HTTP request"));
        assert_eq!(downloader.called_count(), 1);
        assert_eq!(downloader.accepted_count(), 0);
    }
}
