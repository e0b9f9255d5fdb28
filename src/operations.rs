/// User-initiated operations: list, save, restore, delete, rename, clear
use std::collections::HashSet;
use std::rc::Rc;

use log::{info, warn};

use crate::browser::{Browser, GroupUpdate};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::query;
use crate::reconciler::Reconciler;
use crate::restore::{RestoreCoordinator, RestoreOutcome};
use crate::storage::{StorageBackend, Store};
use crate::tab_data::{TabGroupDetail, TabGroupPage};

pub struct TabKeeper<S, B, C> {
    store: Rc<Store<S>>,
    browser: Rc<B>,
    clock: Rc<C>,
    config: Rc<Config>,
}

impl<S, B, C> TabKeeper<S, B, C>
where
    S: StorageBackend + 'static,
    B: Browser + 'static,
    C: Clock + 'static,
{
    pub fn new(store: Rc<Store<S>>, browser: Rc<B>, clock: Rc<C>, config: Rc<Config>) -> Self {
        TabKeeper {
            store,
            browser,
            clock,
            config,
        }
    }

    pub fn reconciler(&self) -> Reconciler<S, B, C> {
        Reconciler::new(
            self.store.clone(),
            self.browser.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    /// One page of stored groups; `page_size` defaults to the configured one.
    pub async fn list(
        &self,
        keyword: &str,
        expanded: &HashSet<i32>,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<TabGroupPage> {
        let page_size = page_size.unwrap_or(self.config.default_page_size);
        query::list_group_details(&self.store, keyword, expanded, page, page_size).await
    }

    pub async fn group_detail(&self, group_id: i32) -> Result<Option<TabGroupDetail>> {
        query::tab_group_detail(&self.store, group_id, true).await
    }

    pub async fn save_now(&self) -> Result<Vec<TabGroupDetail>> {
        self.reconciler().save_now().await
    }

    pub async fn handle_command(&self, command: &str) -> Result<()> {
        self.reconciler().handle_command(command).await
    }

    pub async fn restore(&self, group_id: i32) -> Result<RestoreOutcome> {
        RestoreCoordinator::new(self.store.clone(), self.browser.clone(), self.config.clone())
            .restore(group_id)
            .await
    }

    /// Deletes a stored group and its tabs. Returns how many tabs went.
    pub async fn delete_group(&self, group_id: i32) -> Result<usize> {
        let removed = self.store.delete_group_cascade(group_id).await?;
        info!("deleted group {} with {} tabs", group_id, removed);
        Ok(removed)
    }

    /// Forgets a stored tab and closes it if it is still open.
    /// Returns whether the tab was stored.
    pub async fn remove_tab(&self, tab_id: i32) -> Result<bool> {
        let Some(tab) = self.store.get_tab(tab_id).await? else {
            return Ok(false);
        };
        self.store.delete_tab(tab_id).await?;
        self.store.touch_group(tab.group_id, self.clock.now()).await?;

        if let Err(err) = self.browser.remove_tab(tab_id).await {
            warn!("tab {} was not open: {}", tab_id, err);
        }
        Ok(true)
    }

    /// Renames the stored group and, when it is open, the live one.
    /// Returns whether a stored group existed.
    pub async fn rename_group(&self, group_id: i32, title: &str) -> Result<bool> {
        let update = GroupUpdate {
            title: Some(title.to_string()),
            ..Default::default()
        };
        if let Err(err) = self.browser.update_group(group_id, update).await {
            warn!("group {} is not open, renaming stored copy only: {}", group_id, err);
        }
        Ok(self
            .store
            .rename_group(group_id, title, self.clock.now())
            .await?)
    }

    /// Wipes every stored group, tab and window-close marker.
    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear_groups().await?;
        self.store.clear_tabs().await?;
        self.store.clear_window_close_events().await?;
        info!("cleared all stored groups");
        Ok(())
    }
}
