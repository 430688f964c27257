//! Page interaction seam
//!
//! The engine never touches a page directly: every instruction handler
//! is a pure function of (payload, adapter) → outcome. [`PageAdapter`]
//! is the narrow capability surface a host embeds — a real browser
//! bridge in production, [`SimulatedPage`] in tests and CLI rehearsals.
//!
//! The engine owns none of the element-query strategy; it only states
//! the content-match contract via [`content_matches`].

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque handle to a page element, valid until the next navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// Capability surface through which the engine inspects and
/// manipulates the page under automation.
///
/// Calls are synchronous from the engine's point of view: an adapter
/// call must complete before the next scheduling decision.
pub trait PageAdapter: Send + Sync {
    /// Find the first element matching `selector` whose content
    /// satisfies [`content_matches`] when `content` is given.
    fn query(&self, selector: &str, content: Option<&str>) -> Option<Handle>;

    /// Whether the element is rendered visible (not display:none,
    /// zero-opacity, or visibility:hidden).
    fn is_visible(&self, handle: Handle) -> bool;

    /// Whether the element refuses interaction.
    fn is_disabled(&self, handle: Handle) -> bool;

    /// The currently focused element, if any.
    fn focused(&self) -> Option<Handle>;

    /// Click the element.
    fn click(&self, handle: Handle);

    /// Set the element's value. Returns false when the target rejects
    /// the value (e.g. a select without a matching option), in which
    /// case the element is left at its prior value.
    fn set_value(&self, handle: Handle, text: &str) -> bool;

    /// Current location path.
    fn current_path(&self) -> String;

    /// Navigate to `href`. In a real host this may terminate the
    /// process; callers persist state first.
    fn navigate(&self, href: &str);

    /// Reload the page. Same process-death caveat as `navigate`.
    fn reload(&self);

    /// Resize the window.
    fn resize(&self, width: u32, height: u32);

    /// Wipe the page's own storage. Engine state is snapshotted and
    /// rewritten around this call.
    fn clear_storage(&self);

    /// Expire all cookies.
    fn clear_cookies(&self);

    /// Fetch the remote newline-delimited instruction document used by
    /// the `test` command.
    fn fetch_script(&self) -> Result<String>;

    /// Whether this window was spawned by a controlling parent
    /// (resume policy hook for `resize` scripts).
    fn has_parent_window(&self) -> bool;
}

/// Content-match contract for ` with <content>` clauses.
///
/// Equality is checked, in order, against trimmed text content, then
/// input value, then placeholder — the first present non-empty
/// candidate decides.
#[must_use]
pub fn content_matches(
    expected: &str,
    text: Option<&str>,
    value: Option<&str>,
    placeholder: Option<&str>,
) -> bool {
    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        return text == expected;
    }
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        return value == expected;
    }
    if let Some(placeholder) = placeholder.filter(|p| !p.is_empty()) {
        return placeholder == expected;
    }
    false
}

// =============================================================================
// Simulated page
// =============================================================================

/// One element on a [`SimulatedPage`].
///
/// Also serves as the on-disk fixture format for CLI rehearsal runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimElement {
    /// Selector this element answers to (exact match)
    pub selector: String,
    pub text: Option<String>,
    pub value: Option<String>,
    pub placeholder: Option<String>,
    pub visible: bool,
    pub disabled: bool,
    /// Number of queries that miss before the element appears
    pub appears_after: u32,
    /// When set, `set_value` only accepts these values (select-style)
    pub accepted_values: Option<Vec<String>>,
}

impl Default for SimElement {
    fn default() -> Self {
        Self {
            selector: String::new(),
            text: None,
            value: None,
            placeholder: None,
            visible: true,
            disabled: false,
            appears_after: 0,
            accepted_values: None,
        }
    }
}

impl SimElement {
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    #[must_use]
    pub fn appears_after(mut self, queries: u32) -> Self {
        self.appears_after = queries;
        self
    }

    #[must_use]
    pub fn accepting(mut self, values: &[&str]) -> Self {
        self.accepted_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }
}

/// On-disk page fixture: a path plus a set of elements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageFixture {
    pub path: Option<String>,
    pub elements: Vec<SimElement>,
    /// Redirects applied on navigation: navigating to a key lands on
    /// its value instead (simulates URLs that don't stick)
    pub redirects: std::collections::HashMap<String, String>,
}

/// Everything the engine did to the page, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Clicked(String),
    ValueSet { selector: String, text: String },
    Navigated(String),
    Reloaded,
    Resized(u32, u32),
    ClearedStorage,
    ClearedCookies,
}

#[derive(Default)]
struct PageState {
    path: String,
    elements: Vec<SimElement>,
    /// Remaining missed queries per element index
    pending_appearance: Vec<u32>,
    focused: Option<usize>,
    redirects: std::collections::HashMap<String, String>,
    fetched_script: Option<String>,
    parent_window: bool,
    actions: Vec<PageAction>,
}

/// Deterministic in-memory page for tests and CLI rehearsals.
///
/// Selectors match exactly; appearance delays are counted in queries,
/// not wall time, so tests stay deterministic under virtual time.
pub struct SimulatedPage {
    state: std::sync::Mutex<PageState>,
}

impl Default for SimulatedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(PageState {
                path: "/".to_string(),
                ..PageState::default()
            }),
        }
    }

    /// Build a page from a fixture.
    #[must_use]
    pub fn from_fixture(fixture: PageFixture) -> Self {
        let page = Self::new();
        {
            let mut state = page.lock();
            if let Some(path) = fixture.path {
                state.path = path;
            }
            state.redirects = fixture.redirects;
            state.pending_appearance = fixture.elements.iter().map(|e| e.appears_after).collect();
            state.elements = fixture.elements;
        }
        page
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().expect("page lock poisoned")
    }

    /// Add an element to the page.
    pub fn insert(&self, element: SimElement) {
        let mut state = self.lock();
        state.pending_appearance.push(element.appears_after);
        state.elements.push(element);
    }

    /// Set the current path.
    pub fn set_path(&self, path: impl Into<String>) {
        self.lock().path = path.into();
    }

    /// Focus an element by selector.
    pub fn focus(&self, selector: &str) {
        let mut state = self.lock();
        state.focused = state.elements.iter().position(|e| e.selector == selector);
    }

    /// Register a redirect: navigating to `from` lands on `to`.
    pub fn redirect(&self, from: impl Into<String>, to: impl Into<String>) {
        self.lock().redirects.insert(from.into(), to.into());
    }

    /// Provide the document returned by `fetch_script`.
    pub fn set_fetched_script(&self, script: impl Into<String>) {
        self.lock().fetched_script = Some(script.into());
    }

    /// Mark this window as spawned by a controlling parent.
    pub fn set_parent_window(&self, present: bool) {
        self.lock().parent_window = present;
    }

    /// Snapshot of every action taken so far.
    #[must_use]
    pub fn actions(&self) -> Vec<PageAction> {
        self.lock().actions.clone()
    }

    /// Current value of an element, for assertions.
    #[must_use]
    pub fn value_of(&self, selector: &str) -> Option<String> {
        let state = self.lock();
        state
            .elements
            .iter()
            .find(|e| e.selector == selector)
            .and_then(|e| e.value.clone())
    }
}

impl PageAdapter for SimulatedPage {
    fn query(&self, selector: &str, content: Option<&str>) -> Option<Handle> {
        let mut state = self.lock();
        for idx in 0..state.elements.len() {
            if state.elements[idx].selector != selector {
                continue;
            }
            if let Some(expected) = content {
                let element = &state.elements[idx];
                if !content_matches(
                    expected,
                    element.text.as_deref(),
                    element.value.as_deref(),
                    element.placeholder.as_deref(),
                ) {
                    continue;
                }
            }
            if state.pending_appearance[idx] > 0 {
                state.pending_appearance[idx] -= 1;
                return None;
            }
            return Some(Handle(idx as u64));
        }
        None
    }

    fn is_visible(&self, handle: Handle) -> bool {
        self.lock()
            .elements
            .get(handle.0 as usize)
            .is_some_and(|e| e.visible)
    }

    fn is_disabled(&self, handle: Handle) -> bool {
        self.lock()
            .elements
            .get(handle.0 as usize)
            .is_some_and(|e| e.disabled)
    }

    fn focused(&self) -> Option<Handle> {
        self.lock().focused.map(|idx| Handle(idx as u64))
    }

    fn click(&self, handle: Handle) {
        let mut state = self.lock();
        if let Some(element) = state.elements.get(handle.0 as usize) {
            let selector = element.selector.clone();
            state.actions.push(PageAction::Clicked(selector));
        }
    }

    fn set_value(&self, handle: Handle, text: &str) -> bool {
        let mut state = self.lock();
        let Some(element) = state.elements.get_mut(handle.0 as usize) else {
            return false;
        };
        if let Some(accepted) = &element.accepted_values {
            if !accepted.iter().any(|v| v == text) {
                return false;
            }
        }
        element.value = Some(text.to_string());
        let selector = element.selector.clone();
        state.actions.push(PageAction::ValueSet {
            selector,
            text: text.to_string(),
        });
        true
    }

    fn current_path(&self) -> String {
        self.lock().path.clone()
    }

    fn navigate(&self, href: &str) {
        let mut state = self.lock();
        state.actions.push(PageAction::Navigated(href.to_string()));
        state.path = state
            .redirects
            .get(href)
            .cloned()
            .unwrap_or_else(|| href.to_string());
    }

    fn reload(&self) {
        self.lock().actions.push(PageAction::Reloaded);
    }

    fn resize(&self, width: u32, height: u32) {
        self.lock().actions.push(PageAction::Resized(width, height));
    }

    fn clear_storage(&self) {
        self.lock().actions.push(PageAction::ClearedStorage);
    }

    fn clear_cookies(&self) {
        self.lock().actions.push(PageAction::ClearedCookies);
    }

    fn fetch_script(&self) -> Result<String> {
        self.lock()
            .fetched_script
            .clone()
            .ok_or_else(|| crate::error::RunError::FetchFailed("no script endpoint".to_string()).into())
    }

    fn has_parent_window(&self) -> bool {
        self.lock().parent_window
    }
}
