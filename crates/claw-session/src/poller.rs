//! Periodic list refresh with a selection that stays valid.

use std::{sync::Arc, time::Duration};

use claw_core::{Resource, ResourceSource, SourceError, reconcile_selection};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

/// Shortest period [`ResourcePoller::spawn`] will poll at.
pub const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

/// What readers see. Items are replaced wholesale on every refresh.
#[derive(Debug)]
pub struct Snapshot<R> {
    pub items: Arc<Vec<R>>,
    pub selected: Option<String>,
    /// Error from the latest refresh; the previous items are kept.
    pub last_error: Option<String>,
    /// Successful refreshes so far.
    pub refreshes: u64,
}

impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            selected: self.selected.clone(),
            last_error: self.last_error.clone(),
            refreshes: self.refreshes,
        }
    }
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            selected: None,
            last_error: None,
            refreshes: 0,
        }
    }
}

impl<R: Resource> Snapshot<R> {
    #[must_use]
    pub fn selected_item(&self) -> Option<&R> {
        let id = self.selected.as_deref()?;
        self.items.iter().find(|item| item.id() == id)
    }
}

/// Keeps a list of resources approximately fresh.
pub struct ResourcePoller<S: ResourceSource> {
    source: S,
    state: watch::Sender<Snapshot<S::Item>>,
}

impl<S: ResourceSource> ResourcePoller<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self { source, state }
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot<S::Item> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<S::Item>> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn selected(&self) -> Option<S::Item> {
        self.state.borrow().selected_item().cloned()
    }

    /// Fetch the list once and reconcile the selection.
    ///
    /// # Errors
    /// Returns the source error; the previous list stays in place.
    pub async fn refresh(&self) -> Result<(), SourceError> {
        match self.source.list().await {
            Ok(items) => {
                self.state.send_modify(|snapshot| {
                    let selected = reconcile_selection(snapshot.selected.as_deref(), &items);
                    if selected != snapshot.selected {
                        tracing::debug!(
                            from = ?snapshot.selected,
                            to = ?selected,
                            "Selection changed by refresh"
                        );
                    }
                    snapshot.items = Arc::new(items);
                    snapshot.selected = selected;
                    snapshot.last_error = None;
                    snapshot.refreshes += 1;
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Resource refresh failed: {e}");
                self.state.send_modify(|snapshot| {
                    snapshot.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Select `id` if it is in the current list.
    pub fn select(&self, id: &str) -> bool {
        self.state.send_if_modified(|snapshot| {
            let listed = snapshot.items.iter().any(|item| item.id() == id);
            if !listed || snapshot.selected.as_deref() == Some(id) {
                return false;
            }
            snapshot.selected = Some(id.to_owned());
            true
        });
        self.state.borrow().selected.as_deref() == Some(id)
    }
}

impl<S: ResourceSource + 'static> ResourcePoller<S> {
    /// Refresh now and then every `period` until the handle is aborted.
    ///
    /// Periods below [`MIN_POLL_PERIOD`] are raised to it.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        let period = period.max(MIN_POLL_PERIOD);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Failures are recorded in the snapshot.
                let _ = self.refresh().await;
            }
        })
    }
}
