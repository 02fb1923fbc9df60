use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BrowserResult;

/// A concrete UI locator resolved from a symbolic selector name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    /// Selectors starting with `/`, `./` or `(` are XPath expressions; everything else is CSS.
    pub fn parse(selector: &str) -> Self {
        let trimmed = selector.trim();
        if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with('(') {
            Locator::XPath(trimmed.to_string())
        } else {
            Locator::Css(trimmed.to_string())
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Locator::Css(value) | Locator::XPath(value) => value,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(value) => write!(f, "css={value}"),
            Locator::XPath(value) => write!(f, "xpath={value}"),
        }
    }
}

pub type ElementHandle = Box<dyn UiElement>;

#[async_trait(?Send)]
pub trait UiElement {
    async fn text(&self) -> BrowserResult<String>;
    async fn attribute(&self, name: &str) -> BrowserResult<Option<String>>;
    async fn click(&self) -> BrowserResult<()>;
    async fn clear(&self) -> BrowserResult<()>;
    async fn send_keys(&self, text: &str) -> BrowserResult<()>;
    async fn submit(&self) -> BrowserResult<()>;
    /// Rendered with a layout box and not hidden by style.
    async fn is_visible(&self) -> BrowserResult<bool>;
    async fn scroll_into_view(&self) -> BrowserResult<()>;
}

/// Capabilities the core needs from the remote UI automation driver.
#[async_trait(?Send)]
pub trait UiDriver {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;
    async fn page_title(&self) -> BrowserResult<String>;
    async fn page_markup(&self) -> BrowserResult<String>;
    async fn execute_script(&self, source: &str) -> BrowserResult<Value>;
    async fn refresh(&self) -> BrowserResult<()>;
    async fn take_visual_snapshot(&self, path: &Path) -> BrowserResult<()>;
    async fn save_markup(&self, path: &Path, content: &str) -> BrowserResult<()>;
    async fn find_one(&self, locator: &Locator) -> BrowserResult<Option<ElementHandle>>;
    async fn find_many(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>>;
    async fn close(&self) -> BrowserResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_detects_xpath_expressions() {
        assert_eq!(
            Locator::parse("//button[@type='submit']"),
            Locator::xpath("//button[@type='submit']")
        );
        assert_eq!(
            Locator::parse("(//div[@role='dialog'])[1]"),
            Locator::xpath("(//div[@role='dialog'])[1]")
        );
        assert_eq!(
            Locator::parse("  input[name='username'] "),
            Locator::css("input[name='username']")
        );
    }

    #[test]
    fn locator_display_includes_strategy() {
        assert_eq!(Locator::css("body").to_string(), "css=body");
        assert_eq!(Locator::xpath("//a").to_string(), "xpath=//a");
    }
}
