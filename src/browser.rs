//! Headless Chrome backend for [`PortalSession`].
//!
//! One Chrome process per scan. The process is killed when the session is
//! stopped or dropped, whichever comes first, so an aborted scan never leaves
//! an orphaned browser behind.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::browser::ConnectionClosed;
use headless_chrome::types::RemoteError;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use tracing::{debug, warn};

use crate::config::{AppConfig, BrowserConfig};
use crate::portal::{DriverError, Key, Locator, PortalSession};
use crate::scan::SessionLauncher;

/// Returns true when the element can take a click right now.
const CLICKABLE_SCRIPT: &str = r#"function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    return !this.disabled
        && rect.width > 0 && rect.height > 0
        && style.visibility !== "hidden"
        && style.display !== "none"
        && style.pointerEvents !== "none";
}"#;

const SELECT_CONTENT_SCRIPT: &str = r#"function() {
    this.focus();
    if (typeof this.select === "function") { this.select(); }
}"#;

const SCRIPT_CLICK: &str = "function() { this.click(); }";

/// Launch parameters resolved from configuration and the environment.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    pub sandbox: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    pub window_size: (u32, u32),
    pub startup_timeout: Duration,
    pub idle_timeout: Duration,
}

impl LaunchSettings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            headless: config.headless,
            sandbox: !is_container(),
            chrome_path: resolve_chrome_path(config.chrome_path.as_deref()),
            user_agent: config.user_agent.clone(),
            window_size: (config.window_width, config.window_height),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

/// Sandbox is unavailable inside containers
/// (detected via /.dockerenv or the APRSCAN_CONTAINER env var).
pub fn is_container() -> bool {
    std::env::var("APRSCAN_CONTAINER").is_ok() || Path::new("/.dockerenv").exists()
}

/// Chrome binary lookup: explicit config, then CHROME_PATH, then well-known
/// install locations. `None` leaves discovery to headless_chrome.
pub fn resolve_chrome_path(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("CHROME_PATH") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        // WSL: Windows Chrome installation
        "/mnt/c/Program Files/Google/Chrome/Application/chrome.exe",
    ]
    .iter()
    .map(Path::new)
    .find(|p| p.exists())
    .map(Path::to_path_buf)
}

/// Launches one [`ChromeSession`] per scan.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    settings: LaunchSettings,
}

impl ChromeLauncher {
    /// `headed` forces a visible window regardless of configuration.
    pub fn from_config(config: &AppConfig, headed: bool) -> Self {
        let mut settings = LaunchSettings::from_config(&config.browser);
        if headed {
            settings.headless = false;
        }
        Self { settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }
}

impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self) -> Result<ChromeSession, DriverError> {
        ChromeSession::launch(&self.settings)
    }
}

/// A live Chrome process with the single tab the scan drives.
pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeSession {
    /// Start Chrome and open a tab. Fails with `EngineUnavailable` when the
    /// binary cannot be found or does not come up within the startup timeout.
    pub fn launch(settings: &LaunchSettings) -> Result<Self, DriverError> {
        let (sender, receiver) = mpsc::channel();
        let thread_settings = settings.clone();

        // Browser::new blocks until Chrome answers on its debug port; run it
        // off-thread so the startup timeout is enforced here.
        std::thread::spawn(move || {
            let _ = sender.send(start_browser(&thread_settings));
        });

        let browser = match receiver.recv_timeout(settings.startup_timeout) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(DriverError::EngineUnavailable(format!(
                    "browser did not start within {}s",
                    settings.startup_timeout.as_secs()
                )))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(DriverError::EngineUnavailable("browser launcher thread exited".to_string()))
            }
        };

        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::EngineUnavailable(format!("failed to open browser tab: {}", e)))?;

        debug!("Browser started (headless: {}, sandbox: {})", settings.headless, settings.sandbox);
        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    fn tab(&self) -> Result<&Arc<Tab>, DriverError> {
        self.tab.as_ref().ok_or(DriverError::SessionClosed)
    }

    fn find(&self, locator: &Locator) -> Result<Element<'_>, DriverError> {
        let tab = self.tab()?;
        let found = match locator {
            Locator::Id(id) => tab.find_element(&format!("[id=\"{}\"]", id)),
            Locator::Css(css) => tab.find_element(css),
            Locator::XPath(xpath) => tab.find_element_by_xpath(xpath),
        };
        found.map_err(|e| lookup_error(e, locator))
    }

    fn find_all(&self, locator: &Locator) -> Result<Vec<Element<'_>>, DriverError> {
        let tab = self.tab()?;
        let found = match locator {
            Locator::Id(id) => tab.find_elements(&format!("[id=\"{}\"]", id)),
            Locator::Css(css) => tab.find_elements(css),
            Locator::XPath(xpath) => tab.find_elements_by_xpath(xpath),
        };
        // headless_chrome reports "no match" as an error.
        match found {
            Ok(elements) => Ok(elements),
            Err(e) => match lookup_error(e, locator) {
                DriverError::NotFound(_) => Ok(Vec::new()),
                other => Err(other),
            },
        }
    }

    fn call(&self, element: &Element<'_>, locator: &Locator, function: &str) -> Result<Option<serde_json::Value>, DriverError> {
        element
            .call_js_fn(function, vec![], false)
            .map(|remote| remote.value)
            .map_err(|e| session_error(e, |reason| DriverError::Script(format!("{} on {}", reason, locator))))
    }
}

/// Lookups fail with "not there (yet)" only when Chrome itself answered.
/// A closed connection or a transport timeout means the browser is gone.
fn lookup_error(error: anyhow::Error, locator: &Locator) -> DriverError {
    if error.is::<NoElementFound>() || error.is::<RemoteError>() {
        DriverError::NotFound(locator.to_string())
    } else {
        warn!("Lookup of {} failed, treating the browser as gone: {:#}", locator, error);
        DriverError::SessionClosed
    }
}

fn session_error(error: anyhow::Error, otherwise: impl FnOnce(String) -> DriverError) -> DriverError {
    if error.is::<ConnectionClosed>() {
        DriverError::SessionClosed
    } else {
        otherwise(error.to_string())
    }
}

fn start_browser(settings: &LaunchSettings) -> Result<Browser, DriverError> {
    let user_agent_arg = format!("--user-agent={}", settings.user_agent);
    let args: Vec<&OsStr> = vec![
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-gpu"),
        OsStr::new(user_agent_arg.as_str()),
    ];

    let options = LaunchOptions::default_builder()
        .headless(settings.headless)
        .sandbox(settings.sandbox)
        .path(settings.chrome_path.clone())
        .window_size(Some(settings.window_size))
        .idle_browser_timeout(settings.idle_timeout)
        .args(args)
        .build()
        .map_err(|e| DriverError::EngineUnavailable(format!("failed to build Chrome launch options: {}", e)))?;

    Browser::new(options).map_err(|e| DriverError::EngineUnavailable(format!("failed to launch Chrome: {}", e)))
}

impl PortalSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| {
                session_error(e, |reason| DriverError::Navigation {
                    url: url.to_string(),
                    reason,
                })
            })
    }

    fn is_ready(&self) -> Result<bool, DriverError> {
        let state = self
            .tab()?
            .evaluate("document.readyState", false)
            .map_err(|e| session_error(e, DriverError::Script))?;
        Ok(state.value.as_ref().and_then(|v| v.as_str()) == Some("complete"))
    }

    fn is_present(&self, locator: &Locator) -> Result<bool, DriverError> {
        match self.find(locator) {
            Ok(_) => Ok(true),
            Err(DriverError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_clickable(&self, locator: &Locator) -> Result<bool, DriverError> {
        let element = match self.find(locator) {
            Ok(element) => element,
            Err(DriverError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        // A re-render between lookup and check detaches the node; treat as "not yet".
        match self.call(&element, locator, CLICKABLE_SCRIPT) {
            Ok(value) => Ok(value.and_then(|v| v.as_bool()).unwrap_or(false)),
            Err(DriverError::SessionClosed) => Err(DriverError::SessionClosed),
            Err(_) => Ok(false),
        }
    }

    fn click(&self, locator: &Locator) -> Result<(), DriverError> {
        self.find(locator)?
            .click()
            .map(|_| ())
            .map_err(|e| {
                session_error(e, |reason| DriverError::Interaction {
                    locator: locator.to_string(),
                    reason,
                })
            })
    }

    fn script_click(&self, locator: &Locator) -> Result<(), DriverError> {
        let element = self.find(locator)?;
        self.call(&element, locator, SCRIPT_CLICK).map(|_| ())
    }

    fn type_into(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        self.find(locator)?
            .type_into(text)
            .map(|_| ())
            .map_err(|e| {
                session_error(e, |reason| DriverError::Interaction {
                    locator: locator.to_string(),
                    reason,
                })
            })
    }

    fn clear(&self, locator: &Locator) -> Result<(), DriverError> {
        let element = self.find(locator)?;
        self.call(&element, locator, SELECT_CONTENT_SCRIPT)?;
        self.press_key(Key::Backspace)
    }

    fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        self.tab()?
            .type_str(text)
            .map(|_| ())
            .map_err(|e| {
                session_error(e, |reason| DriverError::Interaction {
                    locator: "focused element".to_string(),
                    reason,
                })
            })
    }

    fn press_key(&self, key: Key) -> Result<(), DriverError> {
        self.tab()?
            .press_key(key.name())
            .map(|_| ())
            .map_err(|e| {
                session_error(e, |reason| DriverError::Interaction {
                    locator: format!("key {}", key.name()),
                    reason,
                })
            })
    }

    fn run_script(&self, locator: &Locator, function: &str) -> Result<Vec<String>, DriverError> {
        let mut results = Vec::new();
        for element in self.find_all(locator)? {
            match self.call(&element, locator, function)? {
                Some(serde_json::Value::String(s)) => results.push(s),
                Some(other) => results.push(other.to_string()),
                None => results.push("null".to_string()),
            }
        }
        Ok(results)
    }

    fn stop(&mut self) {
        if let Some(tab) = self.tab.take() {
            if let Err(e) = tab.close(false) {
                debug!("Tab close failed during teardown: {}", e);
            }
        }
        if self.browser.take().is_some() {
            debug!("Browser process terminated");
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!("Browser session dropped without stop(); terminating");
            self.stop();
        }
    }
}
