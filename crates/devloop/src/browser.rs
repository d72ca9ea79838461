//! Page probing for the browser validation tool

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// One problem spotted while loading a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIssue {
    /// Where the problem came from: `http`, `page` or `network`
    pub source: String,
    pub message: String,
}

/// Result of inspecting a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserReport {
    pub errors_found: bool,
    pub details: Vec<BrowserIssue>,
}

impl BrowserReport {
    fn from_issues(details: Vec<BrowserIssue>) -> Self {
        Self {
            errors_found: !details.is_empty(),
            details,
        }
    }
}

/// Something that can open a URL and report errors on the page
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn inspect(&self, url: &str) -> Result<BrowserReport>;
}

/// Plain HTTP probe: fetches the page and looks for error statuses and
/// error text in the body
pub struct HttpProbe {
    client: reqwest::Client,
}

/// Longest body excerpt carried into an issue message
const EXCERPT_LEN: usize = 300;

impl HttpProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserBackend for HttpProbe {
    #[instrument(skip(self))]
    async fn inspect(&self, url: &str) -> Result<BrowserReport> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            bail!("Only HTTP and HTTPS URLs are supported");
        }

        let response = match self.client.get(parsed).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Page could not be loaded");
                return Ok(BrowserReport::from_issues(vec![BrowserIssue {
                    source: "network".to_string(),
                    message: format!("Failed to load page: {}", e),
                }]));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), bytes = body.len(), "Page loaded");

        let mut issues = Vec::new();
        if status.as_u16() >= 400 {
            issues.push(BrowserIssue {
                source: "http".to_string(),
                message: format!("HTTP {}", status),
            });
        }
        if let Some(line) = body.lines().find(|l| l.contains("Error")) {
            issues.push(BrowserIssue {
                source: "page".to_string(),
                message: excerpt(line.trim()),
            });
        }

        Ok(BrowserReport::from_issues(issues))
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe() -> HttpProbe {
        HttpProbe::new(Duration::from_secs(5), "devloop-test").unwrap()
    }

    #[tokio::test]
    async fn test_clean_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let report = probe().inspect(&server.uri()).await.unwrap();
        assert!(!report.errors_found);
        assert!(report.details.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("<h1>Unhandled Runtime Error</h1>\n<p>boom</p>"),
            )
            .mount(&server)
            .await;

        let report = probe()
            .inspect(&format!("{}/broken", server.uri()))
            .await
            .unwrap();
        assert!(report.errors_found);
        assert_eq!(report.details.len(), 2);
        assert_eq!(report.details[0].source, "http");
        assert!(report.details[1].message.contains("Runtime Error"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_issue() {
        // Nothing listens on port 9 locally
        let report = probe().inspect("http://127.0.0.1:9/").await.unwrap();
        assert!(report.errors_found);
        assert_eq!(report.details[0].source, "network");
    }

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        assert!(probe().inspect("file:///etc/passwd").await.is_err());
        assert!(probe().inspect("not a url").await.is_err());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let out = excerpt(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), EXCERPT_LEN + 3);
    }
}
