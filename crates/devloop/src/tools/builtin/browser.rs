//! Browser validation tool

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::browser::BrowserBackend;
use crate::tools::{
    required_str, Footprint, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult,
};

/// Load a page and report errors found on it
pub struct CheckBrowserTool {
    backend: Arc<dyn BrowserBackend>,
}

impl CheckBrowserTool {
    pub fn new(backend: Arc<dyn BrowserBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CheckBrowserTool {
    fn name(&self) -> &str {
        "check_browser_tab_for_error"
    }

    fn description(&self) -> &str {
        "Load a URL and inspect the page for errors. Returns errors_found and the details of each error."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "full_page_url",
            ParameterProperty::string("The full URL of the page to check for errors"),
        )
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::default()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let url = required_str(args, "full_page_url")?;

        let report = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(ToolResult::error("Page check cancelled")),
            report = self.backend.inspect(url) => report?,
        };
        info!(url, errors_found = report.errors_found, "Page checked");
        Ok(ToolResult::json(&serde_json::to_value(&report)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserIssue, BrowserReport};
    use crate::tools::test_support::Fixture;
    use serde_json::json;

    struct FixedBackend(BrowserReport);

    #[async_trait]
    impl BrowserBackend for FixedBackend {
        async fn inspect(&self, _url: &str) -> Result<BrowserReport> {
            Ok(self.0.clone())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl BrowserBackend for BrokenBackend {
        async fn inspect(&self, url: &str) -> Result<BrowserReport> {
            anyhow::bail!("Invalid URL: {}", url)
        }
    }

    #[tokio::test]
    async fn test_errors_reported_as_successful_check() {
        let fx = Fixture::new();
        let report = BrowserReport {
            errors_found: true,
            details: vec![BrowserIssue {
                source: "page".into(),
                message: "Unhandled Runtime Error".into(),
            }],
        };
        let tool = CheckBrowserTool::new(Arc::new(FixedBackend(report)));

        let result = tool
            .execute(&json!({"full_page_url": "http://localhost:3000"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);
        let value: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(value["errors_found"], true);
        assert_eq!(value["details"][0]["source"], "page");
    }

    #[tokio::test]
    async fn test_backend_error_propagates_to_router() {
        let fx = Fixture::new();
        let tool = CheckBrowserTool::new(Arc::new(BrokenBackend));
        let err = tool
            .execute(&json!({"full_page_url": "nope"}), &fx.ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid URL"));
    }
}
