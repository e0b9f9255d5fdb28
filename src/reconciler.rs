/// Keeps the store in step with browser lifecycle events
///
/// Handlers run as independent tasks: events for different tabs interleave
/// freely, and a handler waiting out the debounce window never holds up the
/// events behind it. Every store write is idempotent, so a handler acting on
/// an entity a later event already changed or deleted is harmless.
///
/// When a tab reports that it left its group, the cause is ambiguous: its
/// window may be closing, the tab or group may be closing, or the user may
/// have ungrouped it or dragged it into another group. The window-close
/// removal of the same tab can trail the group change, so the handler waits
/// `Config::debounce` and then looks for a window-close marker for that tab.
/// A marker means the group is going away with its window and must stay
/// saved; no marker means the tab was taken out deliberately. This is a
/// timing heuristic: a window close that lags more than the debounce is
/// misread as an ungroup. The trade is accepted so that closing a window
/// never wipes its saved group.
use std::collections::BTreeMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use log::{debug, info, warn};

use crate::browser::{Browser, BrowserEvent, EventSource, TabChange, TabQuery};
use crate::clock::{Clock, as_millis};
use crate::config::Config;
use crate::error::Result;
use crate::query;
use crate::storage::{StorageBackend, Store};
use crate::tab_data::{GroupColor, LiveTab, Tab, TabGroup, TabGroupDetail, TabStatus, UNGROUPED};

pub const SAVED_NOTIFICATION: &str = "saved success";
pub const SAVE_FAILED_NOTIFICATION: &str = "save failed";
const NOTIFICATION_TITLE: &str = "tab-mirror";

pub struct Reconciler<S, B, C> {
    store: Rc<Store<S>>,
    browser: Rc<B>,
    clock: Rc<C>,
    config: Rc<Config>,
}

impl<S, B, C> Clone for Reconciler<S, B, C> {
    fn clone(&self) -> Self {
        Reconciler {
            store: self.store.clone(),
            browser: self.browser.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, B, C> Reconciler<S, B, C>
where
    S: StorageBackend + 'static,
    B: Browser + 'static,
    C: Clock + 'static,
{
    pub fn new(store: Rc<Store<S>>, browser: Rc<B>, clock: Rc<C>, config: Rc<Config>) -> Self {
        Reconciler {
            store,
            browser,
            clock,
            config,
        }
    }

    /// Subscribes to `source`; each event is handled in its own task
    /// started through `spawn`.
    pub fn attach(
        &self,
        source: &impl EventSource,
        spawn: impl Fn(LocalBoxFuture<'static, ()>) + 'static,
    ) {
        let reconciler = self.clone();
        source.subscribe(Rc::new(move |event| {
            let reconciler = reconciler.clone();
            spawn(Box::pin(async move { reconciler.dispatch(event).await }));
        }));
    }

    /// Handles one event; failures are logged and dropped.
    pub async fn dispatch(&self, event: BrowserEvent) {
        let label = event_label(&event);
        if let Err(err) = self.handle(event).await {
            warn!("{} handler failed: {}", label, err);
        }
    }

    pub async fn handle(&self, event: BrowserEvent) -> Result<()> {
        match event {
            BrowserEvent::TabCreated(tab) => self.on_tab_created(&tab).await,
            BrowserEvent::TabUpdated {
                tab_id,
                change,
                tab,
            } => self.on_tab_updated(tab_id, &change, &tab).await,
            BrowserEvent::TabMoved { tab_id, to_index } => {
                if !self.store.update_tab_index(tab_id, to_index).await? {
                    debug!("moved tab {} is not tracked", tab_id);
                }
                Ok(())
            }
            BrowserEvent::TabRemoved {
                tab_id,
                is_window_closing,
            } => self.on_tab_removed(tab_id, is_window_closing).await,
            BrowserEvent::GroupCreated(group) => {
                // A reused group id starts over, `created_at` included.
                let record = TabGroup::from_live(&group, self.clock.now());
                self.store.put_group(&record).await?;
                Ok(())
            }
            BrowserEvent::GroupUpdated(group) => {
                let update = TabGroup::from_live(&group, self.clock.now());
                self.store.merge_group(&update, self.clock.now()).await?;
                Ok(())
            }
            BrowserEvent::Command(command) => self.handle_command(&command).await,
        }
    }

    async fn on_tab_created(&self, tab: &LiveTab) -> Result<()> {
        let Some(record) = Tab::from_live(tab) else {
            debug!("new tab {} has no url yet", tab.id);
            return Ok(());
        };
        self.store.put_tab(&record).await?;
        if record.is_grouped() {
            self.store.touch_group(record.group_id, self.clock.now()).await?;
        }
        Ok(())
    }

    async fn on_tab_updated(&self, tab_id: i32, change: &TabChange, tab: &LiveTab) -> Result<()> {
        if change.status == Some(TabStatus::Loading) {
            return Ok(());
        }
        if change.group_id == Some(UNGROUPED) {
            return self.on_tab_ungrouped(tab_id).await;
        }

        let relevant = change.group_id.is_some()
            || change.url.is_some()
            || change.title.is_some()
            || change.fav_icon_url.is_some()
            || change.status == Some(TabStatus::Complete);
        if !relevant || tab.group_id == UNGROUPED {
            return Ok(());
        }

        let Some(record) = Tab::from_live(tab) else {
            return Ok(());
        };
        self.store.put_tab(&record).await?;
        self.store.touch_group(record.group_id, self.clock.now()).await?;
        Ok(())
    }

    /// Deferred decision for a tab whose group id became `UNGROUPED`.
    async fn on_tab_ungrouped(&self, tab_id: i32) -> Result<()> {
        let previous_group = match self.store.get_tab(tab_id).await? {
            Some(tab) if tab.is_grouped() => tab.group_id,
            _ => return Ok(()),
        };

        self.clock.sleep(self.config.debounce()).await;

        let now = self.clock.now();
        let since = now - as_millis(self.config.window_close_lookback());
        if self.store.recent_window_close(tab_id, since).await?.is_some() {
            debug!(
                "tab {} left group {} with its window, keeping it",
                tab_id, previous_group
            );
            return Ok(());
        }

        // A later event may already have filed the tab under another group.
        if self.store.delete_tab_if_in_group(tab_id, previous_group).await? {
            debug!("tab {} was taken out of group {}", tab_id, previous_group);
            self.store.touch_group(previous_group, now).await?;
        }
        Ok(())
    }

    async fn on_tab_removed(&self, tab_id: i32, is_window_closing: bool) -> Result<()> {
        let now = self.clock.now();
        if is_window_closing {
            // The tab record stays: its group is now saved.
            let stale_before = now - as_millis(self.config.window_close_lookback());
            self.store
                .record_window_close(tab_id, now, stale_before)
                .await?;
            return Ok(());
        }

        if let Some(tab) = self.store.get_tab(tab_id).await? {
            self.store.delete_tab(tab_id).await?;
            if tab.is_grouped() {
                self.store.touch_group(tab.group_id, now).await?;
            }
        }
        Ok(())
    }

    /// Captures every live group, plus ungrouped tabs as a synthetic group,
    /// and merges them into the store. A captured group replaces any stored
    /// group with the same title. Groups that are not live are untouched.
    ///
    /// Returns the saved groups as read back from the store.
    pub async fn save_now(&self) -> Result<Vec<TabGroupDetail>> {
        let now = self.clock.now();
        let mut captured: BTreeMap<i32, (TabGroup, Vec<Tab>)> = BTreeMap::new();

        for group in self.browser.query_groups().await? {
            let tabs = self.capture_tabs(group.id).await?;
            captured.insert(group.id, (TabGroup::from_live(&group, now), tabs));
        }

        let ungrouped = self.capture_tabs(UNGROUPED).await?;
        if !ungrouped.is_empty() {
            let group = TabGroup {
                id: UNGROUPED,
                title: Some(self.config.ungrouped_title.clone()),
                color: GroupColor::Grey,
                collapsed: false,
                created_at: now,
                updated_at: now,
            };
            captured.insert(UNGROUPED, (group, ungrouped));
        }

        for (group, tabs) in captured.values() {
            self.merge_captured(group.clone(), tabs).await?;
        }

        let mut saved = Vec::with_capacity(captured.len());
        for group_id in captured.keys() {
            if let Some(detail) = query::tab_group_detail(&self.store, *group_id, true).await? {
                saved.push(detail);
            }
        }
        info!(
            "saved {} groups with {} tabs",
            saved.len(),
            saved.iter().map(|detail| detail.tab_count).sum::<usize>()
        );
        Ok(saved)
    }

    async fn capture_tabs(&self, group_id: i32) -> Result<Vec<Tab>> {
        Ok(self
            .browser
            .query_tabs(TabQuery::in_group(group_id))
            .await?
            .iter()
            .filter_map(Tab::from_live)
            .collect())
    }

    async fn merge_captured(&self, mut group: TabGroup, tabs: &[Tab]) -> Result<()> {
        let mut created_at = group.created_at;
        if let Some(existing) = self.store.get_group(group.id).await? {
            created_at = created_at.min(existing.created_at);
        }
        if let Some(title) = group.merge_title() {
            for same_title in self.store.groups_titled(title).await? {
                if same_title.id == group.id {
                    continue;
                }
                created_at = created_at.min(same_title.created_at);
                self.store.delete_group_cascade(same_title.id).await?;
                debug!(
                    "group {} replaces group {} titled {:?}",
                    group.id, same_title.id, title
                );
            }
        }
        group.created_at = created_at;

        self.store.put_group(&group).await?;
        self.store.replace_group_tabs(group.id, tabs).await?;
        Ok(())
    }

    /// Runs a keyboard command. The save command saves and flashes a
    /// confirmation; a failed save leaves a warning notification up.
    pub async fn handle_command(&self, command: &str) -> Result<()> {
        if command != self.config.save_command {
            debug!("ignoring command {:?}", command);
            return Ok(());
        }

        match self.save_now().await {
            Ok(_) => {
                self.notify(SAVED_NOTIFICATION, "tabs saved successfully").await;
                self.clock.sleep(self.config.notification_ttl()).await;
                if let Err(err) = self.browser.clear_notification(SAVED_NOTIFICATION).await {
                    warn!("could not clear notification: {}", err);
                }
                Ok(())
            }
            Err(err) => {
                self.notify(SAVE_FAILED_NOTIFICATION, "tabs could not be saved").await;
                Err(err)
            }
        }
    }

    async fn notify(&self, id: &str, message: &str) {
        if let Err(err) = self.browser.notify(id, NOTIFICATION_TITLE, message).await {
            warn!("could not show notification {:?}: {}", id, err);
        }
    }
}

fn event_label(event: &BrowserEvent) -> &'static str {
    match event {
        BrowserEvent::TabCreated(_) => "tab created",
        BrowserEvent::TabUpdated { .. } => "tab updated",
        BrowserEvent::TabMoved { .. } => "tab moved",
        BrowserEvent::TabRemoved { .. } => "tab removed",
        BrowserEvent::GroupCreated(_) => "group created",
        BrowserEvent::GroupUpdated(_) => "group updated",
        BrowserEvent::Command(_) => "command",
    }
}
