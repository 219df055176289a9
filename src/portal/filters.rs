//! Region filter controller.
//!
//! The state and distributor filters are asynchronous autocomplete widgets
//! with no observable "options loaded" event, so each step waits out a
//! configured settle bound. Whatever suggestion the widget highlights on
//! Enter is accepted as-is.

use tracing::debug;

use super::{DriverError, Key, Locator, Portal, PortalSession};
use crate::record::RegionSelector;

/// Set the state filter, then the distributor filter.
pub fn apply_region<S: PortalSession>(portal: &Portal<S>, selector: &RegionSelector) -> Result<(), DriverError> {
    let state_field = Locator::id(&portal.selectors().state_field_id);
    let distributor_field = Locator::id(&portal.selectors().distributor_field_id);

    select_autocomplete(portal, &state_field, &selector.state)?;
    select_autocomplete(portal, &distributor_field, &selector.distributor)?;
    Ok(())
}

/// click field → type text → Enter → Escape, with a settle between each step.
pub fn select_autocomplete<S: PortalSession>(portal: &Portal<S>, field: &Locator, text: &str) -> Result<(), DriverError> {
    let step = portal.settle_config().autocomplete_step();
    let confirm = portal.settle_config().autocomplete_confirm();

    debug!("Selecting '{}' in {}", text, field);
    portal.wait_for_clickable(field)?;
    portal.click(field)?;
    portal.settle(step)?;
    portal.send_keys(text)?;
    portal.settle(step)?;
    portal.press_key(Key::Enter)?;
    portal.settle(confirm)?;
    // Close the dropdown if it is still open.
    portal.press_key(Key::Escape)?;
    Ok(())
}
