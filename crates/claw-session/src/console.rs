//! Per-page composition: a polled resource list plus tabbed live panels.

use std::{fmt, sync::Arc};

use claw_core::{ClientConfig, Resource, ResourceSource, StreamTarget, TokenIssuer};
use claw_transport::Connector;
use tokio::sync::watch;

use crate::{
    chat::ChatPanel,
    log_panel::LogPanel,
    poller::{ResourcePoller, Snapshot},
    shell::ShellPanel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tab {
    #[default]
    Logs,
    Shell,
    Chat,
}

impl Tab {
    pub const ALL: [Self; 3] = [Self::Logs, Self::Shell, Self::Chat];
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logs => "Logs",
            Self::Shell => "Shell",
            Self::Chat => "Chat",
        })
    }
}

/// Issuers for each stream kind; logs use a log-scoped token, the
/// subdomain streams an agent-scoped one.
#[derive(Clone)]
pub struct ConsoleIssuers {
    pub logs: Arc<dyn TokenIssuer>,
    pub shell: Arc<dyn TokenIssuer>,
    pub chat: Arc<dyn TokenIssuer>,
}

/// Agent management page: a polled list and one live stream for the
/// visible tab of the selected resource.
pub struct AgentConsole<S: ResourceSource> {
    poller: Arc<ResourcePoller<S>>,
    logs: LogPanel,
    shell: ShellPanel,
    chat: ChatPanel,
    tab: Tab,
    bound: Option<StreamTarget>,
}

impl<S: ResourceSource> AgentConsole<S> {
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        poller: Arc<ResourcePoller<S>>,
        issuers: ConsoleIssuers,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::from_panels(
            poller,
            LogPanel::new(config, issuers.logs, Arc::clone(&connector)),
            ShellPanel::new(issuers.shell, Arc::clone(&connector)),
            ChatPanel::new(issuers.chat, connector),
        )
    }

    #[must_use]
    pub fn from_panels(
        poller: Arc<ResourcePoller<S>>,
        logs: LogPanel,
        shell: ShellPanel,
        chat: ChatPanel,
    ) -> Self {
        Self {
            poller,
            logs,
            shell,
            chat,
            tab: Tab::Logs,
            bound: None,
        }
    }

    #[must_use]
    pub const fn poller(&self) -> &Arc<ResourcePoller<S>> {
        &self.poller
    }

    #[must_use]
    pub const fn tab(&self) -> Tab {
        self.tab
    }

    #[must_use]
    pub const fn logs(&self) -> &LogPanel {
        &self.logs
    }

    #[must_use]
    pub const fn shell(&self) -> &ShellPanel {
        &self.shell
    }

    #[must_use]
    pub const fn chat(&self) -> &ChatPanel {
        &self.chat
    }

    /// Resource the visible panel is bound to.
    #[must_use]
    pub const fn bound(&self) -> Option<&StreamTarget> {
        self.bound.as_ref()
    }

    /// Switch tabs; only the visible tab keeps a live stream.
    pub fn set_tab(&mut self, tab: Tab) {
        if self.tab == tab {
            return;
        }
        tracing::debug!(from = %self.tab, to = %tab, "Switching tab");
        self.tab = tab;
        self.sync();
    }

    /// Select a resource by id. Returns false if it is not listed.
    pub fn select(&mut self, id: &str) -> bool {
        let selected = self.poller.select(id);
        if selected {
            self.sync();
        }
        selected
    }

    /// Bring the panels in line with the poller's current snapshot.
    pub fn sync(&mut self) {
        let snapshot = self.poller.snapshot();
        self.apply(&snapshot);
    }

    /// Follow the poller until it is dropped.
    pub async fn follow(&mut self) {
        let mut updates = self.poller.subscribe();
        loop {
            let snapshot = updates.borrow_and_update().clone();
            self.apply(&snapshot);
            if updates.changed().await.is_err() {
                break;
            }
        }
    }

    /// Subscribe to list snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<S::Item>> {
        self.poller.subscribe()
    }

    /// Manual reconnect of the visible stream.
    pub fn reconnect(&self) {
        match self.tab {
            Tab::Logs => self.logs.reconnect(),
            Tab::Shell => self.shell.reconnect(),
            Tab::Chat => self.chat.reconnect(),
        }
    }

    fn apply(&mut self, snapshot: &Snapshot<S::Item>) {
        let Some(item) = snapshot.selected_item() else {
            if self.bound.take().is_some() {
                tracing::debug!("Nothing selected; closing streams");
            }
            self.deactivate_all();
            return;
        };
        let target = item.stream_target();
        let connectable = item.is_connectable();
        if self.bound.as_ref() != Some(&target) {
            tracing::info!(resource_id = %target.id, tab = %self.tab, "Binding console");
        }

        for tab in Tab::ALL {
            if tab != self.tab {
                self.deactivate(tab);
            }
        }
        // Lifecycle first so a stopped resource starts parked.
        match self.tab {
            Tab::Logs => {
                self.logs.set_connectable(connectable);
                self.logs.activate(target.clone());
            }
            Tab::Shell => {
                self.shell.set_connectable(connectable);
                self.shell.activate(target.clone());
            }
            Tab::Chat => {
                self.chat.set_connectable(connectable);
                self.chat.activate(target.clone());
            }
        }
        self.bound = Some(target);
    }

    fn deactivate(&mut self, tab: Tab) {
        match tab {
            Tab::Logs => self.logs.deactivate(),
            Tab::Shell => self.shell.deactivate(),
            Tab::Chat => self.chat.deactivate(),
        }
    }

    fn deactivate_all(&mut self) {
        for tab in Tab::ALL {
            self.deactivate(tab);
        }
    }
}

impl<S: ResourceSource> Drop for AgentConsole<S> {
    fn drop(&mut self) {
        self.deactivate_all();
    }
}
