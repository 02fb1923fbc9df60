#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::{json, Value};

use instat_core::browser::{
    BrowserError, BrowserResult, ElementHandle, Locator, UiDriver, UiElement,
};
use instat_core::{parse_instat_config, InstatConfig};

pub const LOGIN_URL: &str = "https://www.instagram.com/accounts/login/";
pub const HOME_URL: &str = "https://www.instagram.com/";

pub const USERNAME: &str = "#username";
pub const PASSWORD: &str = "#password";
pub const LOGIN_BUTTON: &str = "button.login";
pub const IGNORE: &str = "button.ignore";
pub const SAVE_INFO_BUTTON: &str = "button.save-info";
pub const SAVE_INFO_DIALOG: &str = "div.save-info";
pub const FOLLOWERS: &str = "a.followers";
pub const FOLLOWING: &str = "a.following";
pub const HANDLE: &str = "span.handle";
pub const SPINNER: &str = "svg.spinner";
pub const CLOSE: &str = "button.close";

pub fn config_toml(diagnostics: &Path, extra_selectors: &str) -> String {
    format!(
        r#"
[collection]
max_refresh_attempts = 3

[diagnostics]
dir = "{dir}"

[selectors]
LOGIN_USERNAME_INPUT = "{USERNAME}"
LOGIN_PASSWORD_INPUT = "{PASSWORD}"
LOGIN_BUTTON_CANDIDATE = "{LOGIN_BUTTON}"
SAVE_LOGIN_INFO_BUTTON = "{SAVE_INFO_BUTTON}"
SAVE_LOGIN_INFO_DIALOG = "{SAVE_INFO_DIALOG}"
FOLLOWERS_LINK = "{FOLLOWERS}"
FOLLOWING_LINK = "{FOLLOWING}"
PROFILE_USERNAME_SPAN = "{HANDLE}"
LOADING_SPINNER = "{SPINNER}"
CLOSE_MODAL_BUTTON = "{CLOSE}"
{extra_selectors}
"#,
        dir = diagnostics.display(),
    )
}

pub fn test_config(diagnostics: &Path) -> InstatConfig {
    parse_instat_config(&config_toml(diagnostics, "")).expect("test config parses")
}

pub type Effect = Rc<dyn Fn(&mut FakeState)>;

pub fn effect(f: impl Fn(&mut FakeState) + 'static) -> Effect {
    Rc::new(f)
}

#[derive(Clone, Default)]
pub struct FakeNode {
    pub text: String,
    pub text_content: Option<String>,
    pub on_click: Option<Effect>,
    pub on_submit: Option<Effect>,
    pub scrolls_list: bool,
    pub stale: bool,
    pub hidden: bool,
    pub rejects_keys: bool,
}

impl FakeNode {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn on_click(mut self, action: Effect) -> Self {
        self.on_click = Some(action);
        self
    }

    pub fn on_submit(mut self, action: Effect) -> Self {
        self.on_submit = Some(action);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn rejecting_keys(mut self) -> Self {
        self.rejects_keys = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Stale,
    Script,
}

/// A list that only renders a sliding window of its items.
#[derive(Debug, Clone, Default)]
pub struct VirtualList {
    pub items: Vec<String>,
    pub window: usize,
    pub step: usize,
    pub offset: usize,
    pub open: bool,
}

impl VirtualList {
    pub fn new(items: Vec<String>, window: usize, step: usize) -> Self {
        Self {
            items,
            window,
            step,
            offset: 0,
            open: false,
        }
    }

    /// Rendered slice: the window at `offset` plus one window kept above it.
    pub fn visible(&self) -> &[String] {
        if !self.open {
            return &[];
        }
        let end = (self.offset + self.window).min(self.items.len());
        let start = self.offset.saturating_sub(self.window).min(end);
        &self.items[start..end]
    }

    fn advance(&mut self) {
        let last_start = self.items.len().saturating_sub(self.window);
        self.offset = (self.offset + self.step).min(last_start);
    }
}

#[derive(Default)]
pub struct FakeState {
    pub url: String,
    pub title: String,
    pub markup: String,
    pub ready_state: String,
    pub nodes: HashMap<String, Vec<FakeNode>>,
    pub list: VirtualList,
    pub faults: HashMap<String, VecDeque<Fault>>,
    pub actions: Vec<String>,
    pub refreshes: usize,
    pub find_calls: usize,
    pub closed: bool,
}

impl FakeState {
    pub fn set_nodes(&mut self, selector: &str, nodes: Vec<FakeNode>) {
        self.nodes.insert(selector.to_string(), nodes);
    }

    pub fn remove_nodes(&mut self, selector: &str) {
        self.nodes.remove(selector);
    }

    pub fn inject_faults(&mut self, selector: &str, faults: &[Fault]) {
        self.faults
            .entry(selector.to_string())
            .or_default()
            .extend(faults.iter().copied());
    }

    pub fn clicked(&self, label: &str) -> bool {
        self.actions.iter().any(|action| action == &format!("click:{label}"))
    }
}

/// Scripted in-memory page standing in for Chromium.
#[derive(Clone)]
pub struct FakeBrowser {
    state: Rc<RefCell<FakeState>>,
}

impl FakeBrowser {
    pub fn blank() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState {
                url: "about:blank".into(),
                title: "Instagram".into(),
                markup: "<html><body></body></html>".into(),
                ready_state: "complete".into(),
                ..FakeState::default()
            })),
        }
    }

    /// Login form whose Enter key redirects to the home feed, plus a profile
    /// page exposing both list links.
    pub fn instagram() -> Self {
        let browser = Self::blank();
        {
            let mut state = browser.state();
            state.set_nodes(USERNAME, vec![FakeNode::with_text("")]);
            state.set_nodes(
                PASSWORD,
                vec![FakeNode::with_text("").on_submit(effect(|state| {
                    state.url = HOME_URL.to_string();
                }))],
            );
            let open_list = effect(|state| state.list.open = true);
            state.set_nodes(
                FOLLOWERS,
                vec![FakeNode::with_text("12 followers").on_click(open_list.clone())],
            );
            state.set_nodes(
                FOLLOWING,
                vec![FakeNode::with_text("3 following").on_click(open_list)],
            );
            state.set_nodes(
                CLOSE,
                vec![FakeNode::with_text("Close").on_click(effect(|state| state.list.open = false))],
            );
            state.set_nodes("body", vec![FakeNode::with_text("")]);
        }
        browser
    }

    pub fn state(&self) -> RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }

    pub fn boxed(&self) -> Box<dyn UiDriver> {
        Box::new(self.clone())
    }

    fn lookup(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>> {
        let selector = locator.as_str().to_string();
        let mut state = self.state.borrow_mut();
        state.find_calls += 1;
        if let Some(fault) = state.faults.get_mut(&selector).and_then(VecDeque::pop_front) {
            return Err(match fault {
                Fault::Stale => BrowserError::Stale(selector),
                Fault::Script => BrowserError::Script(format!("query failed: {selector}")),
            });
        }
        let nodes: Vec<FakeNode> = if selector == HANDLE {
            state
                .list
                .visible()
                .iter()
                .map(|name| FakeNode {
                    text: format!("  {name} "),
                    scrolls_list: true,
                    ..FakeNode::default()
                })
                .collect()
        } else {
            state.nodes.get(&selector).cloned().unwrap_or_default()
        };
        drop(state);
        Ok(nodes
            .into_iter()
            .map(|node| {
                Box::new(FakeElement {
                    state: Rc::clone(&self.state),
                    node,
                }) as ElementHandle
            })
            .collect())
    }
}

#[async_trait(?Send)]
impl UiDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(format!("navigate:{url}"));
        state.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.state.borrow().url.clone())
    }

    async fn page_title(&self) -> BrowserResult<String> {
        Ok(self.state.borrow().title.clone())
    }

    async fn page_markup(&self) -> BrowserResult<String> {
        Ok(self.state.borrow().markup.clone())
    }

    async fn execute_script(&self, source: &str) -> BrowserResult<Value> {
        if source.contains("readyState") {
            Ok(json!(self.state.borrow().ready_state))
        } else {
            Ok(Value::Null)
        }
    }

    async fn refresh(&self) -> BrowserResult<()> {
        let mut state = self.state.borrow_mut();
        state.refreshes += 1;
        state.list.offset = 0;
        Ok(())
    }

    async fn take_visual_snapshot(&self, path: &Path) -> BrowserResult<()> {
        tokio::fs::write(path, b"\x89PNG").await?;
        Ok(())
    }

    async fn save_markup(&self, path: &Path, content: &str) -> BrowserResult<()> {
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn find_one(&self, locator: &Locator) -> BrowserResult<Option<ElementHandle>> {
        Ok(self.lookup(locator)?.into_iter().next())
    }

    async fn find_many(&self, locator: &Locator) -> BrowserResult<Vec<ElementHandle>> {
        self.lookup(locator)
    }

    async fn close(&self) -> BrowserResult<()> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

pub struct FakeElement {
    state: Rc<RefCell<FakeState>>,
    node: FakeNode,
}

impl FakeElement {
    fn run(&self, action: &Option<Effect>) {
        if let Some(action) = action {
            action(&mut self.state.borrow_mut());
        }
    }

    fn record(&self, action: String) {
        self.state.borrow_mut().actions.push(action);
    }
}

#[async_trait(?Send)]
impl UiElement for FakeElement {
    async fn text(&self) -> BrowserResult<String> {
        if self.node.stale {
            return Err(BrowserError::Stale(self.node.text.clone()));
        }
        Ok(self.node.text.clone())
    }

    async fn attribute(&self, name: &str) -> BrowserResult<Option<String>> {
        match name {
            "textContent" => Ok(self.node.text_content.clone()),
            _ => Ok(None),
        }
    }

    async fn click(&self) -> BrowserResult<()> {
        self.record(format!("click:{}", self.node.text.trim()));
        self.run(&self.node.on_click);
        Ok(())
    }

    async fn clear(&self) -> BrowserResult<()> {
        self.record("clear".to_string());
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> BrowserResult<()> {
        if self.node.rejects_keys {
            return Err(BrowserError::Script("element is not interactable".into()));
        }
        self.record(format!("type:{text}"));
        Ok(())
    }

    async fn submit(&self) -> BrowserResult<()> {
        self.record("submit".to_string());
        self.run(&self.node.on_submit);
        Ok(())
    }

    async fn is_visible(&self) -> BrowserResult<bool> {
        Ok(!self.node.hidden)
    }

    async fn scroll_into_view(&self) -> BrowserResult<()> {
        self.record(format!("scroll:{}", self.node.text.trim()));
        if self.node.scrolls_list {
            self.state.borrow_mut().list.advance();
        }
        Ok(())
    }
}
