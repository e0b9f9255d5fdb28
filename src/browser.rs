/// Seams to the live browser: imperative calls and the lifecycle event feed
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::BrowserError;
use crate::tab_data::{GroupColor, LiveGroup, LiveTab, TabStatus};

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Filter for `Browser::query_tabs`
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
}

impl TabQuery {
    pub fn in_group(group_id: i32) -> Self {
        TabQuery {
            group_id: Some(group_id),
            ..Default::default()
        }
    }

    pub fn in_window(window_id: i32) -> Self {
        TabQuery {
            window_id: Some(window_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTab {
    pub url: String,
    pub index: i32,
    pub window_id: i32,
}

/// Properties applied to a live group (`chrome.tabGroups.update`)
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<GroupColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
}

/// Imperative calls into the browser runtime
#[allow(async_fn_in_trait)]
pub trait Browser {
    /// The live group with this id, or `None` when no such group is open.
    async fn get_group(&self, group_id: i32) -> BrowserResult<Option<LiveGroup>>;

    async fn query_groups(&self) -> BrowserResult<Vec<LiveGroup>>;

    async fn query_tabs(&self, query: TabQuery) -> BrowserResult<Vec<LiveTab>>;

    /// Opens a new window and returns its id.
    async fn create_window(&self) -> BrowserResult<i32>;

    async fn create_tab(&self, props: CreateTab) -> BrowserResult<LiveTab>;

    async fn remove_tab(&self, tab_id: i32) -> BrowserResult<()>;

    /// Groups the tabs in `window_id` and returns the new group id.
    async fn group_tabs(&self, tab_ids: &[i32], window_id: i32) -> BrowserResult<i32>;

    async fn update_group(&self, group_id: i32, update: GroupUpdate) -> BrowserResult<()>;

    /// Brings the tabs' window to the front and highlights them.
    async fn focus_tabs(&self, tab_ids: &[i32]) -> BrowserResult<()>;

    async fn notify(&self, id: &str, title: &str, message: &str) -> BrowserResult<()>;

    async fn clear_notification(&self, id: &str) -> BrowserResult<()>;
}

/// Fields that changed in a `chrome.tabs.onUpdated` notification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabChange {
    #[serde(default)]
    pub status: Option<TabStatus>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub group_id: Option<i32>,
}

/// Lifecycle notifications the reconciler consumes
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    TabCreated(LiveTab),
    TabUpdated {
        tab_id: i32,
        change: TabChange,
        tab: LiveTab,
    },
    TabMoved {
        tab_id: i32,
        to_index: i32,
    },
    TabRemoved {
        tab_id: i32,
        is_window_closing: bool,
    },
    GroupCreated(LiveGroup),
    GroupUpdated(LiveGroup),
    /// A keyboard shortcut declared in the extension manifest.
    Command(String),
}

pub type EventListener = Rc<dyn Fn(BrowserEvent)>;

/// Source of browser events; the listener may be called any number of times.
pub trait EventSource {
    fn subscribe(&self, listener: EventListener);
}
