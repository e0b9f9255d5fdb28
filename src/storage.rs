/// Persistent store for tabs, tab groups and window-close markers
///
/// Every record lives under its own key `<table>/<id>` in a key/value
/// backend, so a single record write is atomic on its own. There are no
/// cross-record transactions.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};

use futures::lock::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StorageError;
use crate::tab_data::{Tab, TabGroup, TabWindowCloseEvent};

type StorageResult<T> = Result<T, StorageError>;

/// Async key/value medium the store persists into
#[allow(async_fn_in_trait)]
pub trait StorageBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> StorageResult<Vec<(String, Value)>>;

    /// Writes all entries in one call.
    async fn set(&self, entries: Vec<(String, Value)>) -> StorageResult<()>;

    /// Removes the keys; missing keys are ignored.
    async fn remove(&self, keys: Vec<String>) -> StorageResult<()>;
}

/// In-process backend used by tests and non-browser hosts
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, Value>>,
    unavailable: Cell<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail as if the medium were gone.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    pub fn insert_raw(&self, key: &str, value: Value) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.get() {
            Err(StorageError::Unavailable("memory backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.check()?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    async fn scan(&self, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
        self.check()?;
        Ok(self
            .entries
            .borrow()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> StorageResult<()> {
        self.check()?;
        self.entries.borrow_mut().extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: Vec<String>) -> StorageResult<()> {
        self.check()?;
        let mut entries = self.entries.borrow_mut();
        for key in keys {
            entries.remove(&key);
        }
        Ok(())
    }
}

/// A record kind with its own key space
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;

    fn id(&self) -> i32;
}

impl Record for Tab {
    const TABLE: &'static str = "tab";

    fn id(&self) -> i32 {
        self.id
    }
}

impl Record for TabGroup {
    const TABLE: &'static str = "tab_group";

    fn id(&self) -> i32 {
        self.id
    }
}

impl Record for TabWindowCloseEvent {
    const TABLE: &'static str = "tab_window_close_event";

    fn id(&self) -> i32 {
        self.tab_id
    }
}

fn key_for<R: Record>(id: i32) -> String {
    format!("{}/{}", R::TABLE, id)
}

fn prefix_for<R: Record>() -> String {
    format!("{}/", R::TABLE)
}

/// Offset/limit window over an ordered query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    /// Window for a 0-based page number.
    pub fn nth(page: usize, page_size: usize) -> Page {
        Page {
            offset: page.saturating_mul(page_size),
            limit: page_size,
        }
    }

    fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

/// Typed access to the three record tables
pub struct Store<S> {
    backend: S,
    // Held by read-modify-write operations so interleaved handlers
    // cannot overwrite each other's field updates.
    write_lock: Mutex<()>,
}

impl<S: StorageBackend> Store<S> {
    pub fn new(backend: S) -> Self {
        Store {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    // Generic record access

    async fn get<R: Record>(&self, id: i32) -> StorageResult<Option<R>> {
        let key = key_for::<R>(id);
        match self.backend.get(&key).await? {
            Some(value) => decode(&key, value).map(Some),
            None => Ok(None),
        }
    }

    async fn scan<R: Record>(&self) -> StorageResult<Vec<R>> {
        self.backend
            .scan(&prefix_for::<R>())
            .await?
            .into_iter()
            .map(|(key, value)| decode(&key, value))
            .collect()
    }

    async fn put<R: Record>(&self, records: &[R]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let entries = records
            .iter()
            .map(|record| Ok((key_for::<R>(record.id()), serde_json::to_value(record)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.backend.set(entries).await
    }

    async fn remove<R: Record>(&self, ids: impl IntoIterator<Item = i32>) -> StorageResult<()> {
        let keys: Vec<String> = ids.into_iter().map(key_for::<R>).collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.backend.remove(keys).await
    }

    async fn clear<R: Record>(&self) -> StorageResult<()> {
        let keys = self
            .backend
            .scan(&prefix_for::<R>())
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Ok(());
        }
        self.backend.remove(keys).await
    }

    // Tabs

    pub async fn put_tab(&self, tab: &Tab) -> StorageResult<()> {
        self.put(std::slice::from_ref(tab)).await
    }

    pub async fn put_tabs(&self, tabs: &[Tab]) -> StorageResult<()> {
        self.put(tabs).await
    }

    pub async fn get_tab(&self, tab_id: i32) -> StorageResult<Option<Tab>> {
        self.get(tab_id).await
    }

    pub async fn delete_tab(&self, tab_id: i32) -> StorageResult<()> {
        self.remove::<Tab>([tab_id]).await
    }

    /// Deletes the tab only while it is still stored under `group_id`.
    pub async fn delete_tab_if_in_group(&self, tab_id: i32, group_id: i32) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.get::<Tab>(tab_id).await? {
            Some(tab) if tab.group_id == group_id => {
                self.remove::<Tab>([tab_id]).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Moves a stored tab. Returns `false` when the tab is not tracked.
    pub async fn update_tab_index(&self, tab_id: i32, index: i32) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.get::<Tab>(tab_id).await? {
            Some(mut tab) => {
                tab.index = index;
                self.put(&[tab]).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tabs of a group ordered by index, then id.
    pub async fn tabs_by_group(&self, group_id: i32) -> StorageResult<Vec<Tab>> {
        let mut tabs: Vec<Tab> = self
            .scan::<Tab>()
            .await?
            .into_iter()
            .filter(|tab| tab.group_id == group_id)
            .collect();
        tabs.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
        Ok(tabs)
    }

    pub async fn count_tabs_by_group(&self, group_id: i32) -> StorageResult<usize> {
        Ok(self
            .scan::<Tab>()
            .await?
            .iter()
            .filter(|tab| tab.group_id == group_id)
            .count())
    }

    /// Removes every tab stored under `group_id` and returns how many went.
    pub async fn delete_tabs_by_group(&self, group_id: i32) -> StorageResult<usize> {
        let ids: Vec<i32> = self
            .scan::<Tab>()
            .await?
            .into_iter()
            .filter(|tab| tab.group_id == group_id)
            .map(|tab| tab.id)
            .collect();
        let removed = ids.len();
        self.remove::<Tab>(ids).await?;
        Ok(removed)
    }

    /// Replaces the stored membership of `group_id` with `tabs`.
    pub async fn replace_group_tabs(&self, group_id: i32, tabs: &[Tab]) -> StorageResult<()> {
        let keep: HashSet<i32> = tabs.iter().map(|tab| tab.id).collect();
        let stale: Vec<i32> = self
            .scan::<Tab>()
            .await?
            .into_iter()
            .filter(|tab| tab.group_id == group_id && !keep.contains(&tab.id))
            .map(|tab| tab.id)
            .collect();
        self.remove::<Tab>(stale).await?;
        self.put(tabs).await
    }

    // Groups

    pub async fn put_group(&self, group: &TabGroup) -> StorageResult<()> {
        self.put(std::slice::from_ref(group)).await
    }

    pub async fn get_group(&self, group_id: i32) -> StorageResult<Option<TabGroup>> {
        self.get(group_id).await
    }

    pub async fn delete_group(&self, group_id: i32) -> StorageResult<()> {
        self.remove::<TabGroup>([group_id]).await
    }

    /// Deletes a group record and every tab stored under it.
    pub async fn delete_group_cascade(&self, group_id: i32) -> StorageResult<usize> {
        self.delete_group(group_id).await?;
        self.delete_tabs_by_group(group_id).await
    }

    /// Applies title/color/collapsed from `update`. An existing record keeps
    /// its `created_at` and gets `updated_at = now`; a missing one is created
    /// with both timestamps at `now`.
    pub async fn merge_group(&self, update: &TabGroup, now: i64) -> StorageResult<TabGroup> {
        let _guard = self.write_lock.lock().await;
        let merged = match self.get::<TabGroup>(update.id).await? {
            Some(existing) => TabGroup {
                title: update.title.clone(),
                color: update.color,
                collapsed: update.collapsed,
                updated_at: now,
                ..existing
            },
            None => TabGroup {
                created_at: now,
                updated_at: now,
                ..update.clone()
            },
        };
        self.put(std::slice::from_ref(&merged)).await?;
        Ok(merged)
    }

    /// Bumps `updated_at` of a persisted group; no-op for unknown ids.
    pub async fn touch_group(&self, group_id: i32, now: i64) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.get::<TabGroup>(group_id).await? {
            Some(mut group) => {
                group.updated_at = now;
                self.put(&[group]).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn rename_group(&self, group_id: i32, title: &str, now: i64) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.get::<TabGroup>(group_id).await? {
            Some(mut group) => {
                group.title = Some(title.to_string());
                group.updated_at = now;
                self.put(&[group]).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persisted groups whose non-empty title equals `title` exactly.
    pub async fn groups_titled(&self, title: &str) -> StorageResult<Vec<TabGroup>> {
        Ok(self
            .scan::<TabGroup>()
            .await?
            .into_iter()
            .filter(|group| group.merge_title() == Some(title))
            .collect())
    }

    /// Groups matching `filter`, most recently updated first (ties by
    /// descending id), sliced to `page`.
    pub async fn groups_by_recency(
        &self,
        filter: impl Fn(&TabGroup) -> bool,
        page: Page,
    ) -> StorageResult<Vec<TabGroup>> {
        let mut groups: Vec<TabGroup> = self
            .scan::<TabGroup>()
            .await?
            .into_iter()
            .filter(|group| filter(group))
            .collect();
        groups.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page.apply(groups))
    }

    pub async fn count_groups(&self, filter: impl Fn(&TabGroup) -> bool) -> StorageResult<usize> {
        Ok(self
            .scan::<TabGroup>()
            .await?
            .iter()
            .filter(|group| filter(group))
            .count())
    }

    // Window close markers

    /// Writes a marker for `tab_id` and drops markers closed at or before
    /// `stale_before`, which no later lookup can match.
    pub async fn record_window_close(
        &self,
        tab_id: i32,
        now: i64,
        stale_before: i64,
    ) -> StorageResult<()> {
        let stale: Vec<i32> = self
            .scan::<TabWindowCloseEvent>()
            .await?
            .into_iter()
            .filter(|event| event.tab_id != tab_id && event.closed_at <= stale_before)
            .map(|event| event.tab_id)
            .collect();
        self.remove::<TabWindowCloseEvent>(stale).await?;
        self.put(&[TabWindowCloseEvent {
            tab_id,
            closed_at: now,
        }])
        .await
    }

    /// Marker for `tab_id` written strictly after `since`, if any.
    pub async fn recent_window_close(
        &self,
        tab_id: i32,
        since: i64,
    ) -> StorageResult<Option<TabWindowCloseEvent>> {
        Ok(self
            .get::<TabWindowCloseEvent>(tab_id)
            .await?
            .filter(|event| event.closed_at > since))
    }

    // Reset

    pub async fn clear_tabs(&self) -> StorageResult<()> {
        self.clear::<Tab>().await
    }

    pub async fn clear_groups(&self) -> StorageResult<()> {
        self.clear::<TabGroup>().await
    }

    pub async fn clear_window_close_events(&self) -> StorageResult<()> {
        self.clear::<TabWindowCloseEvent>().await
    }
}

fn decode<R: DeserializeOwned>(key: &str, value: Value) -> StorageResult<R> {
    serde_json::from_value(value).map_err(|source| StorageError::Corrupt {
        key: key.to_string(),
        source,
    })
}
