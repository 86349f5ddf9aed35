// Chrome-backed browser sessions over the DevTools protocol.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::HarvestError;
use crate::traits::{BrowserLauncher, BrowserSession, LaunchConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ChromeLauncher;

impl ChromeLauncher {
    pub fn new() -> Self {
        Self
    }

    async fn start(&self, config: &LaunchConfig) -> crate::error::Result<ChromeSession> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            });
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(bin) = &config.chrome_bin {
            builder = builder.chrome_executable(bin);
        }
        if let Some(dir) = &config.profile_dir {
            builder = builder.user_data_dir(dir);
        }
        let browser_config = builder.build().map_err(HarvestError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser: handler stopped");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        info!(
            headless = config.headless,
            width = config.viewport_width,
            height = config.viewport_height,
            "browser: launched"
        );

        Ok(ChromeSession {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
        })
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, config: &LaunchConfig) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(self.start(config).await?))
    }
}

/// One browser process and the single page the harvester drives.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromeSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self.page.evaluate(script).await?;
        Ok(result.into_value::<T>()?)
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.click().await?.type_str(text).await?;
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        let focused = self.page.find_element(":focus").await?;
        focused.press_key("Enter").await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn page_text(&self) -> Result<String> {
        self.eval("document.body ? document.body.innerText : ''").await
    }

    async fn outer_html_all(&self, selector: &str) -> Result<Vec<String>> {
        let selector = serde_json::to_string(selector)?;
        self.eval(&format!(
            "Array.from(document.querySelectorAll({selector})).map(el => el.outerHTML)"
        ))
        .await
    }

    async fn scroll_by_viewport(&self) -> Result<()> {
        let _: bool = self
            .eval("(() => { window.scrollBy(0, window.innerHeight); return true; })()")
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = browser.close().await {
            warn!(error = %e, "browser: close failed");
        }
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "browser: wait after close failed");
        }
        self.handler_task.abort();
        info!("browser: closed");
        Ok(())
    }
}
