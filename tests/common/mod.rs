//! Scripted in-memory portal used by the integration tests.
//!
//! The fake answers every locator as present and clickable, records every
//! interaction, and returns canned grid rows for whatever identifier was last
//! typed into the search field.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use aprscan::config::AppConfig;
use aprscan::portal::{DriverError, Key, Locator, PortalSession};
use aprscan::scan::SessionLauncher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate(String),
    TypeInto(Locator, String),
    Click(Locator),
    ScriptClick(Locator),
    Clear(Locator),
    SendKeys(String),
    Press(Key),
    Stop,
}

#[derive(Debug, Default)]
pub struct FakePortal {
    pub actions: Vec<Action>,
    pub launches: usize,
    pub stops: usize,
    pub fail_launch: bool,
    pub fail_navigation: bool,
    /// Locators that never show up.
    pub missing: HashSet<Locator>,
    /// Identifiers whose filter button never appears after typing them.
    pub stuck_queries: HashSet<String>,
    /// Identifiers whose grid script fails after the search went through.
    pub broken_extraction: HashSet<String>,
    /// The browser dies right after this identifier is typed.
    pub crash_on_query: Option<String>,
    /// Sets the flag as soon as this text is typed anywhere, like a Ctrl-C
    /// arriving mid-step.
    pub interrupt_on: Option<(String, Arc<AtomicBool>)>,
    /// Grid rows (script output) per identifier.
    pub rows: HashMap<String, Vec<String>>,
    crashed: bool,
    search_field: Option<Locator>,
    filter_button: Option<Locator>,
    row_locator: Option<Locator>,
    current_query: Option<String>,
}

impl FakePortal {
    /// Searches issued, in order.
    pub fn queries(&self) -> Vec<String> {
        let search = self.search_field.clone();
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::TypeInto(locator, text) if Some(locator) == search.as_ref() => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text typed through `send_keys` (the autocomplete filters).
    pub fn typed_filters(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::SendKeys(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn hidden(&self, locator: &Locator) -> bool {
        if self.missing.contains(locator) {
            return true;
        }
        let stuck = self
            .current_query
            .as_ref()
            .is_some_and(|query| self.stuck_queries.contains(query));
        stuck && Some(locator) == self.filter_button.as_ref()
    }
}

pub type SharedPortal = Arc<Mutex<FakePortal>>;

/// Config with zero settle bounds and short waits.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default_config().expect("embedded config is valid");
    config.portal.wait_timeout_secs = 1;
    config.portal.poll_interval_ms = 10;
    config.settle.post_navigation_ms = 0;
    config.settle.post_login_ms = 0;
    config.settle.post_filter_ms = 0;
    config.settle.autocomplete_step_ms = 0;
    config.settle.autocomplete_confirm_ms = 0;
    config
}

pub fn shared_portal(config: &AppConfig) -> SharedPortal {
    Arc::new(Mutex::new(FakePortal {
        search_field: Some(Locator::id(&config.selectors.search_field_id)),
        filter_button: Some(Locator::xpath(&config.selectors.filter_button_xpath)),
        row_locator: Some(Locator::css(&config.selectors.result_row_css)),
        ..FakePortal::default()
    }))
}

/// One grid row as the row script would return it.
pub fn grid_row(created_at: &str, id: &str, order: &str, company: &str, status: &str) -> String {
    serde_json::json!({
        "createdAt": created_at,
        "id": id,
        "orderNumber": order,
        "companyName": company,
        "statusName": status,
    })
    .to_string()
}

pub struct FakeLauncher(pub SharedPortal);

impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    fn launch(&self) -> Result<FakeSession, DriverError> {
        let mut portal = self.0.lock().unwrap();
        portal.launches += 1;
        if portal.fail_launch {
            return Err(DriverError::EngineUnavailable("no chrome binary".to_string()));
        }
        Ok(FakeSession {
            portal: Arc::clone(&self.0),
            closed: false,
        })
    }
}

pub struct FakeSession {
    portal: SharedPortal,
    closed: bool,
}

impl FakeSession {
    fn with<T>(&self, f: impl FnOnce(&mut FakePortal) -> T) -> Result<T, DriverError> {
        if self.closed {
            return Err(DriverError::SessionClosed);
        }
        let mut portal = self.portal.lock().unwrap();
        if portal.crashed {
            return Err(DriverError::SessionClosed);
        }
        Ok(f(&mut *portal))
    }

    fn record(&self, action: Action) -> Result<(), DriverError> {
        self.with(|portal| portal.actions.push(action))
    }
}

impl PortalSession for FakeSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let fail = self.with(|portal| {
            portal.actions.push(Action::Navigate(url.to_string()));
            portal.fail_navigation
        })?;
        if fail {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        Ok(())
    }

    fn is_ready(&self) -> Result<bool, DriverError> {
        self.with(|_| true)
    }

    fn is_present(&self, locator: &Locator) -> Result<bool, DriverError> {
        self.with(|portal| !portal.hidden(locator))
    }

    fn is_clickable(&self, locator: &Locator) -> Result<bool, DriverError> {
        self.with(|portal| !portal.hidden(locator))
    }

    fn click(&self, locator: &Locator) -> Result<(), DriverError> {
        self.record(Action::Click(locator.clone()))
    }

    fn script_click(&self, locator: &Locator) -> Result<(), DriverError> {
        self.record(Action::ScriptClick(locator.clone()))
    }

    fn type_into(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        self.with(|portal| {
            if Some(locator) == portal.search_field.as_ref() {
                portal.current_query = Some(text.to_string());
                portal.crashed = portal.crash_on_query.as_deref() == Some(text);
            }
            if let Some((trigger, flag)) = &portal.interrupt_on {
                if trigger == text {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            portal.actions.push(Action::TypeInto(locator.clone(), text.to_string()));
        })
    }

    fn clear(&self, locator: &Locator) -> Result<(), DriverError> {
        self.record(Action::Clear(locator.clone()))
    }

    fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        self.record(Action::SendKeys(text.to_string()))
    }

    fn press_key(&self, key: Key) -> Result<(), DriverError> {
        self.record(Action::Press(key))
    }

    fn run_script(&self, locator: &Locator, _function: &str) -> Result<Vec<String>, DriverError> {
        self.with(|portal| {
            if Some(locator) != portal.row_locator.as_ref() {
                return Ok(Vec::new());
            }
            let query = portal.current_query.clone().unwrap_or_default();
            if portal.broken_extraction.contains(&query) {
                return Err(DriverError::Script(format!(
                    "Cannot read properties of null (reading 'textContent') on {}",
                    locator
                )));
            }
            Ok(portal.rows.get(&query).cloned().unwrap_or_default())
        })?
    }

    fn stop(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut portal = self.portal.lock().unwrap();
            portal.stops += 1;
            portal.actions.push(Action::Stop);
        }
    }
}
