/// Data structures for tab-mirror
use serde::{Deserialize, Serialize};

/// Group id the browser reports for a tab that belongs to no group
/// (`chrome.tabGroups.TAB_GROUP_ID_NONE`). Also the id of the synthetic
/// "ungrouped" group written by a snapshot.
pub const UNGROUPED: i32 = -1;

/// A tracked browser tab as persisted in the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: i32,
    pub group_id: i32,
    pub index: i32,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
}

impl Tab {
    /// Builds the persisted form of a live tab. Returns `None` when the
    /// tab has no url yet, since such a tab cannot be restored.
    pub fn from_live(tab: &LiveTab) -> Option<Tab> {
        let url = tab.url.as_deref().filter(|url| !url.is_empty())?;
        Some(Tab {
            id: tab.id,
            group_id: tab.group_id,
            index: tab.index,
            title: tab.title.clone().unwrap_or_default(),
            url: url.to_string(),
            fav_icon_url: tab.fav_icon_url.clone(),
        })
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id != UNGROUPED
    }
}

/// Colors a browser tab group can take
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    #[default]
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

/// A tab group, live or persisted-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabGroup {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub collapsed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TabGroup {
    /// New record for a group first observed at `now`.
    pub fn from_live(group: &LiveGroup, now: i64) -> TabGroup {
        TabGroup {
            id: group.id,
            title: group.title.clone(),
            color: group.color,
            collapsed: group.collapsed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Non-empty title, the identity used when merging snapshots.
    pub fn merge_title(&self) -> Option<&str> {
        self.title.as_deref().filter(|title| !title.is_empty())
    }

    pub fn title_contains(&self, keyword_lowercase: &str) -> bool {
        self.title
            .as_deref()
            .is_some_and(|title| title.to_lowercase().contains(keyword_lowercase))
    }
}

/// Marker that a tab disappeared because its whole window closed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabWindowCloseEvent {
    pub tab_id: i32,
    pub closed_at: i64,
}

/// A persisted group together with its tabs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabGroupDetail {
    pub group: TabGroup,
    pub tabs: Vec<Tab>,
    pub tab_count: usize,
}

/// One page of group details plus the total match count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabGroupPage {
    pub details: Vec<TabGroupDetail>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Load state reported by the browser
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Unloaded,
    Loading,
    Complete,
}

/// A tab as the browser reports it (`chrome.tabs.Tab`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveTab {
    pub id: i32,
    pub index: i32,
    pub window_id: i32,
    #[serde(default = "ungrouped")]
    pub group_id: i32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pending_url: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub status: Option<TabStatus>,
}

/// A tab group as the browser reports it (`chrome.tabGroups.TabGroup`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveGroup {
    pub id: i32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub collapsed: bool,
    pub window_id: i32,
}

fn ungrouped() -> i32 {
    UNGROUPED
}
