//! Live checks for candidate URLs.

use regex::Regex;
use reqwest::{header, Client, Method, Response, StatusCode};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::affiliate::MarketplacePolicy;
use crate::config::{LinkConfig, DEFAULT_USER_AGENT};
use crate::record::LinkField;

/// Why a URL was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("not an image (content-type {0:?})")]
    NotAnImage(String),

    #[error("page title {0:?} does not mention the game")]
    TitleMismatch(String),

    #[error("host is not a known marketplace")]
    NotMarketplace,
}

impl From<reqwest::Error> for VerifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VerifyError::Timeout(err.to_string())
        } else {
            VerifyError::Transport(err.to_string())
        }
    }
}

/// Statuses that send an image check from HEAD to GET.
const IMAGE_GET_FALLBACK: [StatusCode; 3] = [
    StatusCode::FORBIDDEN,
    StatusCode::NOT_FOUND,
    StatusCode::METHOD_NOT_ALLOWED,
];

fn title_pattern() -> Option<&'static Regex> {
    static TITLE: OnceLock<Option<Regex>> = OnceLock::new();
    TITLE
        .get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok())
        .as_ref()
}

/// Lower-cased, trimmed `<title>` text, empty when there is none.
pub fn page_title(html: &str) -> String {
    title_pattern()
        .and_then(|re| re.captures(html))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default()
}

/// Verifies one URL for one link field.
#[derive(Clone)]
pub struct LinkVerifier {
    client: Client,
    marketplace: MarketplacePolicy,
}

impl LinkVerifier {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        marketplace: MarketplacePolicy,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            marketplace,
        })
    }

    pub fn from_config(config: &LinkConfig) -> Result<Self, VerifyError> {
        let user_agent = if config.user_agent.trim().is_empty() {
            DEFAULT_USER_AGENT
        } else {
            config.user_agent.as_str()
        };
        Self::new(
            user_agent,
            config.http_timeout(),
            MarketplacePolicy::new(
                config.marketplace_domains.clone(),
                config.amazon_tracking_id.clone(),
            ),
        )
    }

    /// Check `raw` for `field` and return the URL to store.
    ///
    /// `titles` are lower-cased title variants; a page passes when its
    /// `<title>` contains any of them. Fetched URLs are returned as given
    /// (trimmed), never re-serialized.
    pub async fn verify(
        &self,
        field: LinkField,
        raw: &str,
        titles: &[String],
    ) -> Result<String, VerifyError> {
        match field {
            LinkField::Amazon => self
                .marketplace
                .accept(raw)
                .ok_or(VerifyError::NotMarketplace),
            LinkField::Image => {
                self.verify_image(&parse(raw)?).await?;
                Ok(raw.trim().to_string())
            }
            LinkField::Official => {
                self.verify_page(&parse(raw)?, titles).await?;
                Ok(raw.trim().to_string())
            }
        }
    }

    async fn send(&self, method: Method, url: &Url) -> Result<Response, VerifyError> {
        Ok(self.client.request(method, url.clone()).send().await?)
    }

    async fn verify_image(&self, url: &Url) -> Result<(), VerifyError> {
        let mut response = self.send(Method::HEAD, url).await?;
        if IMAGE_GET_FALLBACK.contains(&response.status()) {
            debug!(url = %url, status = response.status().as_u16(), "HEAD refused, retrying with GET");
            response = self.send(Method::GET, url).await?;
        }

        if response.status() != StatusCode::OK {
            return Err(VerifyError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if content_type.contains("image/") || content_type.contains("application/octet-stream") {
            Ok(())
        } else {
            Err(VerifyError::NotAnImage(content_type))
        }
    }

    /// Official page check. GET always runs for the title; a failed HEAD
    /// is only logged. 403/405 on GET are tolerated.
    async fn verify_page(&self, url: &Url, titles: &[String]) -> Result<(), VerifyError> {
        match self.send(Method::HEAD, url).await {
            Ok(head) if head.status() == StatusCode::OK => {}
            Ok(head) => {
                debug!(url = %url, status = head.status().as_u16(), "HEAD not OK, falling back to GET")
            }
            Err(e) => debug!(url = %url, error = %e, "HEAD failed, falling back to GET"),
        }

        let response = self.send(Method::GET, url).await?;
        let status = response.status();
        let refused = matches!(status, StatusCode::FORBIDDEN | StatusCode::METHOD_NOT_ALLOWED);
        if status != StatusCode::OK && !refused {
            return Err(VerifyError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let title = page_title(&body);
        if titles.iter().any(|t| !t.is_empty() && title.contains(t.as_str())) {
            Ok(())
        } else {
            Err(VerifyError::TitleMismatch(title))
        }
    }
}

fn parse(raw: &str) -> Result<Url, VerifyError> {
    let url = Url::parse(raw.trim()).map_err(|e| VerifyError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(VerifyError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier() -> LinkVerifier {
        LinkVerifier::new(
            DEFAULT_USER_AGENT,
            Duration::from_secs(2),
            MarketplacePolicy::new(vec!["amazon.co.jp".into()], Some("scribe-22".into())),
        )
        .unwrap()
    }

    fn titles() -> Vec<String> {
        vec!["catan".to_string(), "カタン".to_string()]
    }

    #[test]
    fn test_page_title() {
        assert_eq!(
            page_title("<html><head><TITLE lang=\"en\">\n  CATAN | Official\n</TITLE></head>"),
            "catan | official"
        );
        assert_eq!(page_title("<html></html>"), "");
    }

    #[tokio::test]
    async fn test_official_page_title_match() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/catan"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>Catan - Home</title></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/catan", server.uri());
        let accepted = verifier().verify(LinkField::Official, &url, &titles()).await.unwrap();
        assert_eq!(accepted, url);
    }

    #[tokio::test]
    async fn test_bare_host_returned_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<title>CATAN GmbH</title>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // server.uri() has no trailing slash
        let bare = server.uri();
        assert!(!bare.ends_with('/'));
        let accepted = verifier()
            .verify(LinkField::Official, &format!("  {bare} "), &titles())
            .await
            .unwrap();
        assert_eq!(accepted, bare);
    }

    #[tokio::test]
    async fn test_head_timeout_falls_back_to_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<title>Catan</title>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let v = LinkVerifier::new(
            DEFAULT_USER_AGENT,
            Duration::from_millis(300),
            MarketplacePolicy::default(),
        )
        .unwrap();
        assert!(v
            .verify(LinkField::Official, &format!("{}/home", server.uri()), &titles())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_official_title_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<title>Domain for sale</title>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let err = verifier()
            .verify(LinkField::Official, &server.uri(), &titles())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::TitleMismatch(t) if t == "domain for sale"));
    }

    #[tokio::test]
    async fn test_official_tolerates_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403).set_body_raw("<title>CATAN</title>", "text/html"),
            )
            .mount(&server)
            .await;

        assert!(verifier()
            .verify(LinkField::Official, &server.uri(), &titles())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_image_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/box.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let v = verifier();
        assert!(v
            .verify(LinkField::Image, &format!("{}/box.png", server.uri()), &[])
            .await
            .is_ok());
        assert!(matches!(
            v.verify(LinkField::Image, &format!("{}/page", server.uri()), &[]).await,
            Err(VerifyError::NotAnImage(ct)) if ct == "text/html"
        ));
    }

    #[tokio::test]
    async fn test_image_get_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![0u8, 1, 2], "application/octet-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert!(verifier()
            .verify(LinkField::Image, &format!("{}/img", server.uri()), &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_amazon_needs_no_fetch() {
        let v = verifier();
        assert_eq!(
            v.verify(LinkField::Amazon, "https://www.amazon.co.jp/dp/B01", &[])
                .await
                .unwrap(),
            "https://www.amazon.co.jp/dp/B01?tag=scribe-22"
        );
        assert!(matches!(
            v.verify(LinkField::Amazon, "https://www.amazon.com/dp/B01", &[]).await,
            Err(VerifyError::NotMarketplace)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let err = verifier()
            .verify(LinkField::Image, "http://127.0.0.1:9/x.png", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Transport(_) | VerifyError::Timeout(_)));
    }
}
