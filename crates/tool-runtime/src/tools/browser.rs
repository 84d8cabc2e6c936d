//! Headless browser sessions for `web_automate`.
//!
//! [`WebDriverLauncher`] speaks the W3C WebDriver protocol over HTTP to a
//! running driver (chromedriver, geckodriver, selenium). Tests substitute
//! their own [`BrowserLauncher`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_EVERY: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Timeout waiting for selector '{selector}' after {timeout:?}")]
    Timeout { selector: String, timeout: Duration },
    #[error("Captcha detected on {url}")]
    Captcha { url: String },
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("WebDriver error: {0}")]
    Driver(String),
    #[error("WebDriver transport failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// One browser window. Every selector-based call waits up to `timeout` for
/// the element to appear.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

pub struct WebDriverLauncher {
    client: reqwest::Client,
    base_url: String,
    headless: bool,
}

impl WebDriverLauncher {
    pub fn new(base_url: impl Into<String>, headless: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headless,
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut chrome_args = vec!["--window-size=1280,800"];
        let mut firefox_args = vec!["-width=1280", "-height=800"];
        if self.headless {
            chrome_args.push("--headless=new");
            firefox_args.push("-headless");
        }
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": { "args": chrome_args },
                    "moz:firefoxOptions": { "args": firefox_args }
                }
            }
        });
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?;
        let value = unwrap_value(response).await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Driver("new session response has no sessionId".into()))?
            .to_string();
        debug!(session_id, "browser session started");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
        }))
    }
}

struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
}

impl WebDriverSession {
    async fn post(&self, path: &str, body: Value) -> Result<Value, BrowserError> {
        let response = self
            .client
            .post(format!("{}{}", self.session_url, path))
            .json(&body)
            .send()
            .await?;
        unwrap_value(response).await
    }

    async fn get(&self, path: &str) -> Result<Value, BrowserError> {
        let response = self
            .client
            .get(format!("{}{}", self.session_url, path))
            .send()
            .await?;
        unwrap_value(response).await
    }

    /// Poll for `selector` until it exists or `timeout` elapses.
    async fn find(&self, selector: &str, timeout: Duration) -> Result<String, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self
                .post("/element", json!({ "using": "css selector", "value": selector }))
                .await;
            match found {
                Ok(value) => {
                    if let Some(id) = value[ELEMENT_KEY].as_str() {
                        return Ok(id.to_string());
                    }
                }
                Err(BrowserError::Driver(message)) if message.starts_with("no such element") => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_EVERY).await;
        }
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.post("/timeouts", json!({ "pageLoad": timeout.as_millis() as u64 }))
            .await?;
        self.post("/url", json!({ "url": url })).await?;

        let source = self.get("/source").await?;
        let source = source.as_str().unwrap_or_default().to_lowercase();
        if source.contains("g-recaptcha") || source.contains("h-captcha") || source.contains("cf-turnstile") {
            return Err(BrowserError::Captcha { url: url.to_string() });
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError> {
        let element = self.find(selector, timeout).await?;
        self.post(&format!("/element/{element}/clear"), json!({})).await?;
        self.post(&format!("/element/{element}/value"), json!({ "text": value }))
            .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let element = self.find(selector, timeout).await?;
        self.post(&format!("/element/{element}/click"), json!({})).await?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.find(selector, timeout).await.map(|_| ())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Driver("screenshot response is not a string".into()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| BrowserError::Driver(format!("screenshot is not base64: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.client.delete(&self.session_url).send().await?;
        Ok(())
    }
}

/// The `value` member of a WebDriver response, or the driver's error.
async fn unwrap_value(response: reqwest::Response) -> Result<Value, BrowserError> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or_default();
    Err(BrowserError::Driver(format!("{error}: {message}")))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    //! Scripted in-memory browser.

    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct FakeBrowser {
        /// Selectors that never appear.
        pub missing: HashSet<String>,
        /// Navigation to this URL hits a captcha.
        pub captcha_on: Option<String>,
        /// Navigation to this URL is refused.
        pub denied_on: Option<String>,
        /// Every action performed, in order.
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeBrowser {
        pub fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeBrowser {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
            self.log.lock().unwrap().push("launch".into());
            Ok(Box::new(FakeSession {
                missing: self.missing.clone(),
                captcha_on: self.captcha_on.clone(),
                denied_on: self.denied_on.clone(),
                log: self.log.clone(),
            }))
        }
    }

    struct FakeSession {
        missing: HashSet<String>,
        captcha_on: Option<String>,
        denied_on: Option<String>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSession {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn locate(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
            if self.missing.contains(selector) {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            self.record(format!("goto {url}"));
            if self.captcha_on.as_deref() == Some(url) {
                return Err(BrowserError::Captcha { url: url.to_string() });
            }
            if self.denied_on.as_deref() == Some(url) {
                return Err(BrowserError::AccessDenied(format!("403 Forbidden: {url}")));
            }
            Ok(())
        }

        async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError> {
            self.locate(selector, timeout)?;
            self.record(format!("fill {selector}={value}"));
            Ok(())
        }

        async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
            self.locate(selector, timeout)?;
            self.record(format!("click {selector}"));
            Ok(())
        }

        async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
            self.locate(selector, timeout)?;
            self.record(format!("wait {selector} {}ms", timeout.as_millis()));
            Ok(())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
            self.record("screenshot".into());
            Ok(b"\x89PNG fake".to_vec())
        }

        async fn close(self: Box<Self>) -> Result<(), BrowserError> {
            self.record("close".into());
            Ok(())
        }
    }
}
