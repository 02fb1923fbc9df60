use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, ReloadParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::driver::{ElementHandle, Locator, UiDriver, UiElement};
use super::error::{BrowserError, BrowserResult};

const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";
const XPATH_MARKER: &str = "data-instat-xpath";

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ChromiumSection>,
}

impl BrowserLauncher {
    pub fn new(config: ChromiumSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        Arc::make_mut(&mut self.config).headless = headless;
        self
    }

    pub fn with_executable(mut self, path: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).executable_path = Some(path.into());
        self
    }

    pub async fn launch(&self) -> BrowserResult<BrowserSession> {
        let chromium_config = self.build_chromium_config()?;
        let [width, height] = self.config.window_size;
        info!(
            ua = %self.config.user_agent,
            width,
            height,
            headless = self.config.headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        if self.config.hide_webdriver_flag {
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(HIDE_WEBDRIVER_SCRIPT)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }

        Ok(BrowserSession {
            browser: AsyncMutex::new(browser),
            page,
            handler_task: AsyncMutex::new(Some(handler_task)),
            xpath_batches: Cell::new(0),
        })
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window_size;
        let mut builder = ChromiumConfig::builder()
            .window_size(width, height)
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: Some(2.0),
                emulating_mobile: true,
                is_landscape: false,
                has_touch: true,
            });

        if let Some(path) = &self.config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={}", self.config.user_agent),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserSession {
    browser: AsyncMutex<Browser>,
    page: Page,
    handler_task: AsyncMutex<Option<JoinHandle<()>>>,
    xpath_batches: Cell<u64>,
}

impl BrowserSession {
    pub async fn shutdown(self) -> BrowserResult<()> {
        self.close().await
    }

    async fn query(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>> {
        let css = match locator {
            Locator::Css(selector) => selector.clone(),
            Locator::XPath(expression) => match self.mark_xpath_matches(expression).await? {
                Some(css) => css,
                None => return Ok(Vec::new()),
            },
        };
        let elements = self
            .page
            .find_elements(css)
            .await
            .map_err(|err| classify(err, locator))?;
        Ok(elements
            .into_iter()
            .map(|inner| {
                Box::new(ChromiumElement {
                    inner,
                    label: locator.to_string(),
                }) as ElementHandle
            })
            .collect())
    }

    // CDP only resolves CSS selectors, so XPath matches are tagged with a
    // per-query marker token and then selected by that token. Nodes keep
    // their last few tokens so concurrent queries do not erase each other.
    async fn mark_xpath_matches(&self, expression: &str) -> BrowserResult<Option<String>> {
        let batch = self.xpath_batches.get().wrapping_add(1);
        self.xpath_batches.set(batch);
        let literal = serde_json::to_string(expression)
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        let script = format!(
            r#"(() => {{
    const found = document.evaluate({literal}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < found.snapshotLength; i++) {{
        const node = found.snapshotItem(i);
        if (!node || !node.setAttribute) continue;
        const marks = (node.getAttribute('{XPATH_MARKER}') || '').split(' ').filter(Boolean).slice(-7);
        marks.push('b{batch}');
        node.setAttribute('{XPATH_MARKER}', marks.join(' '));
    }}
    return found.snapshotLength;
}})()"#
        );
        let matched = self.execute_script(&script).await?.as_u64().unwrap_or(0);
        if matched == 0 {
            return Ok(None);
        }
        Ok(Some(format!("[{XPATH_MARKER}~='b{batch}']")))
    }
}

#[async_trait(?Send)]
impl UiDriver for BrowserSession {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn page_title(&self) -> BrowserResult<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn page_markup(&self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn execute_script(&self, source: &str) -> BrowserResult<Value> {
        let result = self
            .page
            .evaluate(source)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn refresh(&self) -> BrowserResult<()> {
        self.page.execute(ReloadParams::default()).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn take_visual_snapshot(&self, path: &Path) -> BrowserResult<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = self.page.screenshot(params).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn save_markup(&self, path: &Path, content: &str) -> BrowserResult<()> {
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn find_one(&self, locator: &Locator) -> BrowserResult<Option<ElementHandle>> {
        Ok(self.query(locator).await?.into_iter().next())
    }

    async fn find_many(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>> {
        self.query(locator).await
    }

    async fn close(&self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        {
            let mut browser = self.browser.lock().await;
            if let Err(err) = browser.close().await {
                warn!(error = %err, "Failed to close browser gracefully");
            }
        }
        if let Some(handle) = self.handler_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler_task.get_mut() {
            if !handle.is_finished() {
                warn!("BrowserSession dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

#[derive(Debug)]
pub struct ChromiumElement {
    inner: Element,
    label: String,
}

impl ChromiumElement {
    async fn call(&self, function: &str) -> BrowserResult<Option<Value>> {
        let returns = self
            .inner
            .call_js_fn(function, false)
            .await
            .map_err(|err| self.fault(err))?;
        Ok(returns.result.value)
    }

    fn fault(&self, err: CdpError) -> BrowserError {
        classify_label(err, &self.label)
    }
}

#[async_trait(?Send)]
impl UiElement for ChromiumElement {
    async fn text(&self) -> BrowserResult<String> {
        let text = self.inner.inner_text().await.map_err(|err| self.fault(err))?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> BrowserResult<Option<String>> {
        let literal =
            serde_json::to_string(name).map_err(|err| BrowserError::Script(err.to_string()))?;
        let function = format!(
            "function() {{ const v = this[{literal}]; if (v !== undefined && v !== null && typeof v !== 'object') return String(v); return this.getAttribute({literal}); }}"
        );
        Ok(self.call(&function).await?.and_then(|value| match value {
            Value::String(text) => Some(text),
            Value::Null => None,
            other => Some(other.to_string()),
        }))
    }

    async fn click(&self) -> BrowserResult<()> {
        self.inner.click().await.map_err(|err| self.fault(err))?;
        Ok(())
    }

    async fn clear(&self) -> BrowserResult<()> {
        self.call(
            "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
        )
        .await?;
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> BrowserResult<()> {
        self.inner.focus().await.map_err(|err| self.fault(err))?;
        self.inner.type_str(text).await.map_err(|err| self.fault(err))?;
        Ok(())
    }

    async fn submit(&self) -> BrowserResult<()> {
        self.inner
            .press_key("Enter")
            .await
            .map_err(|err| self.fault(err))?;
        Ok(())
    }

    async fn is_visible(&self) -> BrowserResult<bool> {
        let visible = self
            .call(
                "function() { const s = getComputedStyle(this); const r = this.getBoundingClientRect(); \
return (this.offsetParent !== null || s.position === 'fixed') && s.visibility !== 'hidden' && r.width > 0 && r.height > 0; }",
            )
            .await?;
        Ok(matches!(visible, Some(Value::Bool(true))))
    }

    async fn scroll_into_view(&self) -> BrowserResult<()> {
        self.inner
            .scroll_into_view()
            .await
            .map_err(|err| self.fault(err))?;
        Ok(())
    }
}

fn classify(err: CdpError, locator: &Locator) -> BrowserError {
    classify_label(err, &locator.to_string())
}

fn classify_label(err: CdpError, label: &str) -> BrowserError {
    let message = err.to_string();
    if message.contains("No node with given id")
        || message.contains("Could not find node")
        || message.contains("Node is detached")
        || message.contains("Cannot find context with specified id")
    {
        BrowserError::Stale(label.to_string())
    } else if message.contains("not found") {
        BrowserError::NotFound(label.to_string())
    } else {
        BrowserError::Cdp(err)
    }
}
