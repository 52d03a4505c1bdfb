//! Keeping a selected resource valid across list refreshes.

use crate::Resource;

/// Pick the selection to keep after a refresh.
///
/// The current id survives if it is still listed; otherwise selection falls
/// back to the first item, or to nothing for an empty list.
#[must_use]
pub fn reconcile_selection<R: Resource>(current: Option<&str>, items: &[R]) -> Option<String> {
    if let Some(id) = current {
        if items.iter().any(|item| item.id() == id) {
            return Some(id.to_owned());
        }
    }
    items.first().map(|item| item.id().to_owned())
}
