//! Web tooling behind the queen's `web_search` / `web_fetch` / `browser`
//! tools. Fetch works out of the box; search and browser need an
//! external runtime and degrade to tool-result errors without one.

use qr_domain::{Error, Result};

const FETCH_BODY_CAP: usize = 64 * 1024;

#[async_trait::async_trait]
pub trait WebRunner: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>>;

    /// Fetch a URL's body as text, truncated to a sane cap.
    async fn fetch(&self, url: &str) -> Result<String>;

    /// Run a browser action sequence; returns the final page text.
    async fn browse(&self, actions: &serde_json::Value) -> Result<String>;
}

pub struct HttpWebRunner {
    client: reqwest::Client,
}

impl HttpWebRunner {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent("quoroom/0.1")
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpWebRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WebRunner for HttpWebRunner {
    async fn search(&self, _query: &str) -> Result<Vec<String>> {
        Err(Error::invalid_state("no search backend configured"))
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("fetch {url}: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Internal(format!("fetch body {url}: {e}")))?;
        let mut text = body;
        if text.len() > FETCH_BODY_CAP {
            let mut end = FETCH_BODY_CAP;
            while !text.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            text.truncate(end);
        }
        Ok(text)
    }

    async fn browse(&self, _actions: &serde_json::Value) -> Result<String> {
        Err(Error::invalid_state("no browser runtime attached"))
    }
}
