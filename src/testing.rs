/// In-process stand-ins for the browser, the clock and the event feed
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

use crate::browser::{
    Browser, BrowserEvent, BrowserResult, CreateTab, EventListener, EventSource, GroupUpdate,
    TabQuery,
};
use crate::clock::{Clock, as_millis};
use crate::config::Config;
use crate::error::BrowserError;
use crate::reconciler::Reconciler;
use crate::storage::{MemoryBackend, Store};
use crate::tab_data::{GroupColor, LiveGroup, LiveTab, TabStatus, UNGROUPED};

pub const NEW_TAB_URL: &str = "chrome://newtab/";

/// Clock whose sleepers only wake when the test advances time
pub struct ManualClock {
    now: Cell<i64>,
    sleepers: RefCell<Vec<(i64, oneshot::Sender<()>)>>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        ManualClock {
            now: Cell::new(start),
            sleepers: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, millis: i64) {
        let now = self.now.get() + millis;
        self.now.set(now);

        let due: Vec<oneshot::Sender<()>> = {
            let mut sleepers = self.sleepers.borrow_mut();
            let (due, waiting): (Vec<_>, Vec<_>) =
                sleepers.drain(..).partition(|(deadline, _)| *deadline <= now);
            *sleepers = waiting;
            due.into_iter().map(|(_, wake)| wake).collect()
        };
        for wake in due {
            let _ = wake.send(());
        }
    }

    pub fn pending_sleepers(&self) -> usize {
        self.sleepers.borrow().len()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now.get() + as_millis(duration);
        if deadline <= self.now.get() {
            return;
        }
        let (wake, woken) = oneshot::channel();
        self.sleepers.borrow_mut().push((deadline, wake));
        let _ = woken.await;
    }
}

/// Event source the test pushes events into by hand
#[derive(Default)]
pub struct SyntheticEvents {
    listeners: RefCell<Vec<EventListener>>,
}

impl SyntheticEvents {
    pub fn emit(&self, event: BrowserEvent) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

impl EventSource for SyntheticEvents {
    fn subscribe(&self, listener: EventListener) {
        self.listeners.borrow_mut().push(listener);
    }
}

#[derive(Default)]
struct FakeState {
    next_id: i32,
    tabs: BTreeMap<i32, LiveTab>,
    groups: BTreeMap<i32, LiveGroup>,
    focused: Vec<Vec<i32>>,
    notifications: Vec<(String, String)>,
    cleared: Vec<String>,
    fail_create_tab: bool,
}

impl FakeState {
    fn allocate(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn window_len(&self, window_id: i32) -> i32 {
        self.tabs.values().filter(|tab| tab.window_id == window_id).count() as i32
    }
}

/// Minimal model of windows, tabs and groups
#[derive(Default)]
pub struct FakeBrowser {
    state: RefCell<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let browser = FakeBrowser::default();
        browser.state.borrow_mut().next_id = 100;
        browser
    }

    /// Opens a window holding a live group with one tab per url.
    pub fn open_group(&self, title: &str, color: GroupColor, urls: &[&str]) -> (i32, Vec<i32>) {
        let mut state = self.state.borrow_mut();
        let window_id = state.allocate();
        let group_id = state.allocate();
        state.groups.insert(
            group_id,
            LiveGroup {
                id: group_id,
                title: Some(title.to_string()),
                color,
                collapsed: false,
                window_id,
            },
        );
        let mut tab_ids = Vec::new();
        for (index, url) in urls.iter().enumerate() {
            let id = state.allocate();
            state.tabs.insert(id, live_tab(id, window_id, group_id, index as i32, url));
            tab_ids.push(id);
        }
        (group_id, tab_ids)
    }

    /// Opens a window of ungrouped tabs.
    pub fn open_ungrouped(&self, urls: &[&str]) -> Vec<i32> {
        let mut state = self.state.borrow_mut();
        let window_id = state.allocate();
        let mut tab_ids = Vec::new();
        for (index, url) in urls.iter().enumerate() {
            let id = state.allocate();
            state.tabs.insert(id, live_tab(id, window_id, UNGROUPED, index as i32, url));
            tab_ids.push(id);
        }
        tab_ids
    }

    pub fn close_group(&self, group_id: i32) {
        let mut state = self.state.borrow_mut();
        state.groups.remove(&group_id);
        state.tabs.retain(|_, tab| tab.group_id != group_id);
    }

    pub fn group(&self, group_id: i32) -> Option<LiveGroup> {
        self.state.borrow().groups.get(&group_id).cloned()
    }

    pub fn groups(&self) -> Vec<LiveGroup> {
        self.state.borrow().groups.values().cloned().collect()
    }

    /// Live tabs in `window_id` ordered by index.
    pub fn window_tabs(&self, window_id: i32) -> Vec<LiveTab> {
        let mut tabs: Vec<LiveTab> = self
            .state
            .borrow()
            .tabs
            .values()
            .filter(|tab| tab.window_id == window_id)
            .cloned()
            .collect();
        tabs.sort_by_key(|tab| tab.index);
        tabs
    }

    pub fn focused(&self) -> Vec<Vec<i32>> {
        self.state.borrow().focused.clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.state.borrow().notifications.clone()
    }

    pub fn cleared_notifications(&self) -> Vec<String> {
        self.state.borrow().cleared.clone()
    }

    pub fn fail_tab_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_create_tab = fail;
    }
}

pub fn live_tab(id: i32, window_id: i32, group_id: i32, index: i32, url: &str) -> LiveTab {
    LiveTab {
        id,
        index,
        window_id,
        group_id,
        title: Some(format!("Tab {}", id)),
        url: Some(url.to_string()),
        pending_url: None,
        fav_icon_url: None,
        status: Some(TabStatus::Complete),
    }
}

pub fn live_group(id: i32, title: &str, color: GroupColor) -> LiveGroup {
    LiveGroup {
        id,
        title: Some(title.to_string()),
        color,
        collapsed: false,
        window_id: 1,
    }
}

fn api_error(call: &'static str, message: impl Into<String>) -> BrowserError {
    BrowserError::Api {
        call,
        message: message.into(),
    }
}

impl Browser for FakeBrowser {
    async fn get_group(&self, group_id: i32) -> BrowserResult<Option<LiveGroup>> {
        Ok(self.group(group_id))
    }

    async fn query_groups(&self) -> BrowserResult<Vec<LiveGroup>> {
        Ok(self.groups())
    }

    async fn query_tabs(&self, query: TabQuery) -> BrowserResult<Vec<LiveTab>> {
        let mut tabs: Vec<LiveTab> = self
            .state
            .borrow()
            .tabs
            .values()
            .filter(|tab| query.group_id.is_none_or(|group_id| tab.group_id == group_id))
            .filter(|tab| query.window_id.is_none_or(|window_id| tab.window_id == window_id))
            .cloned()
            .collect();
        tabs.sort_by_key(|tab| (tab.window_id, tab.index));
        Ok(tabs)
    }

    async fn create_window(&self) -> BrowserResult<i32> {
        let mut state = self.state.borrow_mut();
        let window_id = state.allocate();
        let tab_id = state.allocate();
        state
            .tabs
            .insert(tab_id, live_tab(tab_id, window_id, UNGROUPED, 0, NEW_TAB_URL));
        Ok(window_id)
    }

    async fn create_tab(&self, props: CreateTab) -> BrowserResult<LiveTab> {
        let mut state = self.state.borrow_mut();
        if state.fail_create_tab {
            return Err(api_error("tabs.create", "tab creation rejected"));
        }
        let index = props.index.clamp(0, state.window_len(props.window_id));
        for tab in state.tabs.values_mut() {
            if tab.window_id == props.window_id && tab.index >= index {
                tab.index += 1;
            }
        }
        let id = state.allocate();
        let tab = live_tab(id, props.window_id, UNGROUPED, index, &props.url);
        state.tabs.insert(id, tab.clone());
        Ok(tab)
    }

    async fn remove_tab(&self, tab_id: i32) -> BrowserResult<()> {
        let mut state = self.state.borrow_mut();
        let removed = state
            .tabs
            .remove(&tab_id)
            .ok_or_else(|| api_error("tabs.remove", format!("No tab with id: {}.", tab_id)))?;
        for tab in state.tabs.values_mut() {
            if tab.window_id == removed.window_id && tab.index > removed.index {
                tab.index -= 1;
            }
        }
        Ok(())
    }

    async fn group_tabs(&self, tab_ids: &[i32], window_id: i32) -> BrowserResult<i32> {
        let mut state = self.state.borrow_mut();
        let group_id = state.allocate();
        for tab_id in tab_ids {
            let tab = state
                .tabs
                .get_mut(tab_id)
                .ok_or_else(|| api_error("tabs.group", format!("No tab with id: {}.", tab_id)))?;
            tab.group_id = group_id;
        }
        state.groups.insert(
            group_id,
            LiveGroup {
                id: group_id,
                title: None,
                color: GroupColor::Grey,
                collapsed: false,
                window_id,
            },
        );
        Ok(group_id)
    }

    async fn update_group(&self, group_id: i32, update: GroupUpdate) -> BrowserResult<()> {
        let mut state = self.state.borrow_mut();
        let group = state.groups.get_mut(&group_id).ok_or_else(|| {
            api_error("tabGroups.update", format!("No group with id: {}.", group_id))
        })?;
        if let Some(title) = update.title {
            group.title = Some(title);
        }
        if let Some(color) = update.color {
            group.color = color;
        }
        if let Some(collapsed) = update.collapsed {
            group.collapsed = collapsed;
        }
        Ok(())
    }

    async fn focus_tabs(&self, tab_ids: &[i32]) -> BrowserResult<()> {
        self.state.borrow_mut().focused.push(tab_ids.to_vec());
        Ok(())
    }

    async fn notify(&self, id: &str, _title: &str, message: &str) -> BrowserResult<()> {
        self.state
            .borrow_mut()
            .notifications
            .push((id.to_string(), message.to_string()));
        Ok(())
    }

    async fn clear_notification(&self, id: &str) -> BrowserResult<()> {
        self.state.borrow_mut().cleared.push(id.to_string());
        Ok(())
    }
}

/// A reconciler wired to fakes and driven by a single-threaded pool
pub struct Harness {
    pool: RefCell<LocalPool>,
    pub store: Rc<Store<MemoryBackend>>,
    pub browser: Rc<FakeBrowser>,
    pub clock: Rc<ManualClock>,
    pub events: SyntheticEvents,
    pub config: Rc<Config>,
}

impl Harness {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let store = Rc::new(Store::new(MemoryBackend::new()));
        let browser = Rc::new(FakeBrowser::new());
        let clock = Rc::new(ManualClock::new(1_000_000));
        let config = Rc::new(Config::default());
        let events = SyntheticEvents::default();

        let reconciler = Reconciler::new(store.clone(), browser.clone(), clock.clone(), config.clone());
        let spawner = pool.spawner();
        reconciler.attach(&events, move |task| {
            spawner
                .spawn_local(task)
                .expect("local pool accepts tasks while alive");
        });

        Harness {
            pool: RefCell::new(pool),
            store,
            browser,
            clock,
            events,
            config,
        }
    }

    /// Delivers an event and runs every handler until it waits on the clock.
    pub fn emit(&self, event: BrowserEvent) {
        self.events.emit(event);
        self.pool.borrow_mut().run_until_stalled();
    }

    pub fn advance(&self, millis: i64) {
        self.clock.advance(millis);
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Runs `future` to completion alongside the spawned handlers. The
    /// future must not wait on the manual clock.
    pub fn run<T>(&self, future: impl std::future::Future<Output = T>) -> T {
        self.pool.borrow_mut().run_until(future)
    }
}
