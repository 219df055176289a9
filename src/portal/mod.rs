//! Portal session driver.
//!
//! [`PortalSession`] is the raw browser seam: locate, interact and read
//! primitives with no waiting. [`Portal`] layers the portal-specific flow on
//! top (login, search, settle) and owns every wait, so each interaction is
//! preceded by a bounded presence or clickability check.

pub mod extractor;
pub mod filters;
pub mod wait;

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{AppConfig, PortalConfig, SelectorsConfig, SettleConfig};
use crate::record::Credentials;
use wait::{poll_until, PollError};

/// How an element is addressed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Id(String),
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(query: impl Into<String>) -> Self {
        Locator::XPath(query.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Css(css) => write!(f, "css:{}", css),
            Locator::XPath(xpath) => write!(f, "xpath:{}", xpath),
        }
    }
}

/// Keys sent to the focused element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Backspace,
}

impl Key {
    /// DevTools key name.
    pub fn name(&self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::Escape => "Escape",
            Key::Backspace => "Backspace",
        }
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Browser engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Timed out after {}s waiting for {locator} to become {condition}", .timeout.as_secs())]
    ElementTimeout {
        locator: String,
        condition: &'static str,
        timeout: Duration,
    },

    #[error("Timed out after {}s waiting for the page to settle", .0.as_secs())]
    SettleTimeout(Duration),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Element {0} not found")]
    NotFound(String),

    #[error("Interaction with {locator} failed: {reason}")]
    Interaction { locator: String, reason: String },

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Browser session is closed")]
    SessionClosed,
}

/// Raw browser primitives. None of these wait: callers go through
/// [`Portal`], which polls `is_present`/`is_clickable` first.
pub trait PortalSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Whether the document has finished loading.
    fn is_ready(&self) -> Result<bool, DriverError>;

    /// `Ok(false)` when nothing matches; `Err` only when the session itself failed.
    fn is_present(&self, locator: &Locator) -> Result<bool, DriverError>;

    /// Present, rendered with a size, visible and not disabled.
    fn is_clickable(&self, locator: &Locator) -> Result<bool, DriverError>;

    /// Native mouse click.
    fn click(&self, locator: &Locator) -> Result<(), DriverError>;

    /// `element.click()` from script; reaches elements covered by overlays.
    fn script_click(&self, locator: &Locator) -> Result<(), DriverError>;

    fn type_into(&self, locator: &Locator, text: &str) -> Result<(), DriverError>;

    /// Select the element's content and delete it.
    fn clear(&self, locator: &Locator) -> Result<(), DriverError>;

    /// Type into whichever element has focus.
    fn send_keys(&self, text: &str) -> Result<(), DriverError>;

    fn press_key(&self, key: Key) -> Result<(), DriverError>;

    /// Call `function` (a JS function declaration, `this` bound to the
    /// element) on every element matching `locator`, returning each result
    /// as a string. No matches yields an empty list.
    fn run_script(&self, locator: &Locator, function: &str) -> Result<Vec<String>, DriverError>;

    /// Terminate the browser. Must be idempotent.
    fn stop(&mut self);
}

/// An authenticated-or-about-to-be session against the fixed portal.
pub struct Portal<S: PortalSession> {
    session: S,
    portal: PortalConfig,
    settle: SettleConfig,
    selectors: SelectorsConfig,
}

impl<S: PortalSession> Portal<S> {
    pub fn new(session: S, config: &AppConfig) -> Self {
        Self {
            session,
            portal: config.portal.clone(),
            settle: config.settle.clone(),
            selectors: config.selectors.clone(),
        }
    }

    pub fn selectors(&self) -> &SelectorsConfig {
        &self.selectors
    }

    pub fn settle_config(&self) -> &SettleConfig {
        &self.settle
    }

    /// Load the login page and let it render.
    pub fn open_login(&mut self) -> Result<(), DriverError> {
        let url = self.portal.url.clone();
        debug!("Navigating to {}", url);
        self.session.navigate(&url)?;
        self.settle(self.settle.post_navigation())
    }

    /// Fill in the login form and submit it. Success is not checked here;
    /// see [`Portal::verify_login`].
    pub fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
        let username = Locator::id(&self.selectors.username_id);
        let password = Locator::id(&self.selectors.password_id);
        let submit = Locator::xpath(&self.selectors.submit_xpath);

        self.wait_for_present(&username)?;
        self.session.type_into(&username, &credentials.user)?;
        self.wait_for_present(&password)?;
        self.session.type_into(&password, &credentials.secret)?;
        self.wait_for_present(&submit)?;
        self.session.script_click(&submit)?;
        debug!("Login form submitted for user {}", credentials.user);

        self.settle(self.settle.post_login())
    }

    /// The post-login marker control must show up within the wait timeout.
    pub fn verify_login(&self) -> Result<(), DriverError> {
        self.wait_for_present(&Locator::id(&self.selectors.logged_in_marker_id))
    }

    /// Type one identifier into the search box and apply the filter.
    pub fn search(&self, identifier: &str) -> Result<(), DriverError> {
        let field = Locator::id(&self.selectors.search_field_id);
        let button = Locator::xpath(&self.selectors.filter_button_xpath);

        self.wait_for_clickable(&field)?;
        self.session.clear(&field)?;
        self.session.type_into(&field, identifier)?;
        self.wait_for_present(&button)?;
        self.session.script_click(&button)?;

        self.settle(self.settle.post_filter())
    }

    pub fn wait_for_present(&self, locator: &Locator) -> Result<(), DriverError> {
        self.wait_for(locator, "present", |session, loc| session.is_present(loc))
    }

    pub fn wait_for_clickable(&self, locator: &Locator) -> Result<(), DriverError> {
        self.wait_for(locator, "clickable", |session, loc| session.is_clickable(loc))
    }

    fn wait_for<F>(&self, locator: &Locator, condition: &'static str, check: F) -> Result<(), DriverError>
    where
        F: Fn(&S, &Locator) -> Result<bool, DriverError>,
    {
        let timeout = self.portal.wait_timeout();
        poll_until(|| check(&self.session, locator), timeout, self.portal.poll_interval()).map_err(|e| match e {
            PollError::Timeout(timeout) => DriverError::ElementTimeout {
                locator: locator.to_string(),
                condition,
                timeout,
            },
            PollError::Failed(err) => err,
        })
    }

    /// Wait out the minimum settle bound, then until the document reports ready.
    pub fn settle(&self, min: Duration) -> Result<(), DriverError> {
        if !min.is_zero() {
            std::thread::sleep(min);
        }
        poll_until(|| self.session.is_ready(), self.portal.wait_timeout(), self.portal.poll_interval()).map_err(
            |e| match e {
                PollError::Timeout(timeout) => DriverError::SettleTimeout(timeout),
                PollError::Failed(err) => err,
            },
        )
    }

    pub fn click(&self, locator: &Locator) -> Result<(), DriverError> {
        self.session.click(locator)
    }

    pub fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        self.session.send_keys(text)
    }

    pub fn press_key(&self, key: Key) -> Result<(), DriverError> {
        self.session.press_key(key)
    }

    pub fn run_script(&self, locator: &Locator, function: &str) -> Result<Vec<String>, DriverError> {
        self.session.run_script(locator, function)
    }

    /// Tear the browser down.
    pub fn stop(&mut self) {
        self.session.stop();
    }
}
