/// Turns a persisted group back into a live one
use std::rc::Rc;

use log::{info, warn};
use serde::Serialize;
use url::Url;

use crate::browser::{Browser, CreateTab, GroupUpdate, TabQuery};
use crate::config::Config;
use crate::error::Result;
use crate::storage::{StorageBackend, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RestoreOutcome {
    /// Nothing stored for the group.
    Empty,
    /// The group was still open; its tabs were brought to the front.
    Focused { tab_ids: Vec<i32> },
    /// Re-created in a new window and removed from the store.
    Restored { group_id: i32, tab_ids: Vec<i32> },
}

pub struct RestoreCoordinator<S, B> {
    store: Rc<Store<S>>,
    browser: Rc<B>,
    config: Rc<Config>,
}

impl<S: StorageBackend, B: Browser> RestoreCoordinator<S, B> {
    pub fn new(store: Rc<Store<S>>, browser: Rc<B>, config: Rc<Config>) -> Self {
        RestoreCoordinator {
            store,
            browser,
            config,
        }
    }

    /// Restores `group_id` into a new window, or focuses it if it is open.
    ///
    /// The stored copy is deleted only after every browser call succeeded,
    /// so a failed restore can be retried; it may leave a partly filled
    /// window behind.
    pub async fn restore(&self, group_id: i32) -> Result<RestoreOutcome> {
        let tabs = self.store.tabs_by_group(group_id).await?;
        if tabs.is_empty() {
            return Ok(RestoreOutcome::Empty);
        }

        if self.browser.get_group(group_id).await?.is_some() {
            let tab_ids: Vec<i32> = self
                .browser
                .query_tabs(TabQuery::in_group(group_id))
                .await?
                .iter()
                .map(|tab| tab.id)
                .collect();
            self.browser.focus_tabs(&tab_ids).await?;
            return Ok(RestoreOutcome::Focused { tab_ids });
        }

        let window_id = self.browser.create_window().await?;
        let mut tab_ids = Vec::with_capacity(tabs.len());
        // Stored indices can tie or leave gaps once tabs have moved; only
        // their order is meaningful.
        for (position, tab) in tabs.iter().enumerate() {
            let created = self
                .browser
                .create_tab(CreateTab {
                    url: tab.url.clone(),
                    index: position as i32,
                    window_id,
                })
                .await?;
            tab_ids.push(created.id);
        }

        self.close_blank_tabs(window_id, &tab_ids).await;

        let new_group_id = self.browser.group_tabs(&tab_ids, window_id).await?;
        if let Some(group) = self.store.get_group(group_id).await? {
            self.browser
                .update_group(
                    new_group_id,
                    GroupUpdate {
                        title: group.title,
                        color: Some(group.color),
                        collapsed: Some(group.collapsed),
                    },
                )
                .await?;
        }

        self.store.delete_group_cascade(group_id).await?;
        info!(
            "restored group {} as {} with {} tabs",
            group_id,
            new_group_id,
            tab_ids.len()
        );
        Ok(RestoreOutcome::Restored {
            group_id: new_group_id,
            tab_ids,
        })
    }

    /// Closes the new-tab page a fresh window opens with.
    async fn close_blank_tabs(&self, window_id: i32, keep: &[i32]) {
        let tabs = match self.browser.query_tabs(TabQuery::in_window(window_id)).await {
            Ok(tabs) => tabs,
            Err(err) => {
                warn!("could not list tabs of window {}: {}", window_id, err);
                return;
            }
        };

        for tab in tabs {
            if keep.contains(&tab.id) {
                continue;
            }
            let blank = [tab.url.as_deref(), tab.pending_url.as_deref()]
                .into_iter()
                .flatten()
                .any(|url| is_same_page(url, &self.config.new_tab_url));
            if blank {
                if let Err(err) = self.browser.remove_tab(tab.id).await {
                    warn!("could not close blank tab {}: {}", tab.id, err);
                }
            }
        }
    }
}

/// Compares scheme and host, so `chrome://newtab` and `chrome://newtab/`
/// are the same page. Falls back to string equality for unparsable input.
fn is_same_page(candidate: &str, page: &str) -> bool {
    match (Url::parse(candidate), Url::parse(page)) {
        (Ok(candidate), Ok(page)) => {
            candidate.scheme() == page.scheme() && candidate.host_str() == page.host_str()
        }
        _ => candidate == page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tab_data::{GroupColor, Tab, TabGroup};
    use crate::testing::{FakeBrowser, NEW_TAB_URL};
    use futures::executor::block_on;

    const SAVED: i32 = 42;

    type Fixture = (
        Rc<Store<MemoryBackend>>,
        Rc<FakeBrowser>,
        RestoreCoordinator<MemoryBackend, FakeBrowser>,
    );

    fn setup(urls: &[&str]) -> Fixture {
        let store = Rc::new(Store::new(MemoryBackend::new()));
        let browser = Rc::new(FakeBrowser::new());
        block_on(async {
            store
                .put_group(&TabGroup {
                    id: SAVED,
                    title: Some("Reading".to_string()),
                    color: GroupColor::Green,
                    collapsed: true,
                    created_at: 1,
                    updated_at: 2,
                })
                .await
                .unwrap();
            let tabs: Vec<Tab> = urls
                .iter()
                .enumerate()
                .map(|(index, url)| Tab {
                    id: 500 + index as i32,
                    group_id: SAVED,
                    index: index as i32,
                    title: String::new(),
                    url: url.to_string(),
                    fav_icon_url: None,
                })
                .collect();
            store.put_tabs(&tabs).await.unwrap();
        });
        let coordinator =
            RestoreCoordinator::new(store.clone(), browser.clone(), Rc::new(Config::default()));
        (store, browser, coordinator)
    }

    #[test]
    fn test_restore_round_trip() {
        let (store, browser, coordinator) = setup(&["https://one.example/", "https://two.example/"]);

        let outcome = block_on(coordinator.restore(SAVED)).unwrap();

        let (group_id, tab_ids) = match outcome {
            RestoreOutcome::Restored { group_id, tab_ids } => (group_id, tab_ids),
            other => panic!("expected a restored group, got {:?}", other),
        };
        let group = browser.group(group_id).unwrap();
        assert_eq!(group.title.as_deref(), Some("Reading"));
        assert_eq!(group.color, GroupColor::Green);
        assert!(group.collapsed);

        let window = browser.window_tabs(group.window_id);
        let urls: Vec<&str> = window.iter().filter_map(|tab| tab.url.as_deref()).collect();
        assert_eq!(urls, vec!["https://one.example/", "https://two.example/"]);
        assert!(window.iter().all(|tab| tab.group_id == group_id));
        assert_eq!(window.iter().map(|tab| tab.id).collect::<Vec<_>>(), tab_ids);

        assert!(block_on(store.get_group(SAVED)).unwrap().is_none());
        assert_eq!(block_on(store.count_tabs_by_group(SAVED)).unwrap(), 0);
    }

    fn restored_urls(browser: &FakeBrowser, outcome: RestoreOutcome) -> Vec<String> {
        let group_id = match outcome {
            RestoreOutcome::Restored { group_id, .. } => group_id,
            other => panic!("expected a restored group, got {:?}", other),
        };
        let window_id = browser.group(group_id).unwrap().window_id;
        browser
            .window_tabs(window_id)
            .into_iter()
            .filter_map(|tab| tab.url)
            .collect()
    }

    #[test]
    fn test_restore_follows_stored_order_when_indices_tie() {
        let (store, browser, coordinator) =
            setup(&["https://a.example/", "https://b.example/", "https://c.example/"]);
        // c was dragged to the front; a and b kept their old indices
        assert!(block_on(store.update_tab_index(502, 0)).unwrap());
        let stored: Vec<String> = block_on(store.tabs_by_group(SAVED))
            .unwrap()
            .into_iter()
            .map(|tab| tab.url)
            .collect();
        assert_eq!(
            stored,
            vec!["https://a.example/", "https://c.example/", "https://b.example/"]
        );

        let outcome = block_on(coordinator.restore(SAVED)).unwrap();

        assert_eq!(restored_urls(&browser, outcome), stored);
    }

    #[test]
    fn test_restore_with_sparse_indices() {
        let (store, browser, coordinator) = setup(&["https://a.example/", "https://b.example/"]);
        assert!(block_on(store.update_tab_index(500, 9)).unwrap());
        assert!(block_on(store.update_tab_index(501, 4)).unwrap());

        let outcome = block_on(coordinator.restore(SAVED)).unwrap();

        assert_eq!(
            restored_urls(&browser, outcome),
            vec!["https://b.example/", "https://a.example/"]
        );
    }

    #[test]
    fn test_restore_keeps_backup_when_tab_creation_fails() {
        let (store, browser, coordinator) = setup(&["https://one.example/"]);
        browser.fail_tab_creation(true);

        assert!(block_on(coordinator.restore(SAVED)).is_err());

        assert!(block_on(store.get_group(SAVED)).unwrap().is_some());
        assert_eq!(block_on(store.count_tabs_by_group(SAVED)).unwrap(), 1);
    }

    #[test]
    fn test_restore_focuses_live_group() {
        let (store, browser, _) = setup(&[]);
        let (live, live_tabs) =
            browser.open_group("Reading", GroupColor::Green, &["https://one.example/"]);
        block_on(store.put_tab(&Tab {
            id: live_tabs[0],
            group_id: live,
            index: 0,
            title: String::new(),
            url: "https://one.example/".to_string(),
            fav_icon_url: None,
        }))
        .unwrap();
        let coordinator =
            RestoreCoordinator::new(store.clone(), browser.clone(), Rc::new(Config::default()));

        let outcome = block_on(coordinator.restore(live)).unwrap();

        assert_eq!(outcome, RestoreOutcome::Focused { tab_ids: live_tabs.clone() });
        assert_eq!(browser.focused(), vec![live_tabs]);
        assert_eq!(browser.groups().len(), 1);
        assert_eq!(block_on(store.count_tabs_by_group(live)).unwrap(), 1);
    }

    #[test]
    fn test_restore_without_tabs_is_noop() {
        let (store, browser, coordinator) = setup(&[]);

        assert_eq!(block_on(coordinator.restore(SAVED)).unwrap(), RestoreOutcome::Empty);
        assert!(browser.groups().is_empty());
        assert!(block_on(store.get_group(SAVED)).unwrap().is_some());
    }

    #[test]
    fn test_new_tab_page_matching() {
        assert!(is_same_page(NEW_TAB_URL, "chrome://newtab/"));
        assert!(is_same_page("chrome://newtab", "chrome://newtab/"));
        assert!(!is_same_page("chrome://settings/", "chrome://newtab/"));
        assert!(!is_same_page("https://newtab.example/", "chrome://newtab/"));
    }
}
