/// Read-only, paginated listing of persisted groups
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::storage::{Page, StorageBackend, Store};
use crate::tab_data::{TabGroup, TabGroupDetail, TabGroupPage};

/// Lists groups whose title contains `keyword` (case-insensitive, empty
/// matches everything), most recently updated first.
///
/// `page` is 0-based. Groups in `expanded` carry their full tab list; the
/// rest only their tab count. `total` is the number of matching groups
/// regardless of the page.
pub async fn list_group_details<S: StorageBackend>(
    store: &Store<S>,
    keyword: &str,
    expanded: &HashSet<i32>,
    page: usize,
    page_size: usize,
) -> Result<TabGroupPage> {
    if page_size == 0 {
        return Err(Error::InvalidArgument("page size must be positive".to_string()));
    }

    let keyword = keyword.to_lowercase();
    let matches = |group: &TabGroup| keyword.is_empty() || group.title_contains(&keyword);

    let groups = store
        .groups_by_recency(matches, Page::nth(page, page_size))
        .await?;

    let mut details = Vec::with_capacity(groups.len());
    for group in groups {
        let with_tabs = expanded.contains(&group.id);
        details.push(detail_for(store, group, with_tabs).await?);
    }

    Ok(TabGroupPage {
        details,
        total: store.count_groups(matches).await?,
        page,
        page_size,
    })
}

/// One persisted group, or `None` if it does not exist.
pub async fn tab_group_detail<S: StorageBackend>(
    store: &Store<S>,
    group_id: i32,
    with_tabs: bool,
) -> Result<Option<TabGroupDetail>> {
    match store.get_group(group_id).await? {
        Some(group) => Ok(Some(detail_for(store, group, with_tabs).await?)),
        None => Ok(None),
    }
}

async fn detail_for<S: StorageBackend>(
    store: &Store<S>,
    group: TabGroup,
    with_tabs: bool,
) -> Result<TabGroupDetail> {
    let (tabs, tab_count) = if with_tabs {
        let tabs = store.tabs_by_group(group.id).await?;
        let count = tabs.len();
        (tabs, count)
    } else {
        (Vec::new(), store.count_tabs_by_group(group.id).await?)
    };

    Ok(TabGroupDetail {
        group,
        tabs,
        tab_count,
    })
}
