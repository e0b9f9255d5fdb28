/// Tunables, optionally overridden from the `config` storage key
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::StorageBackend;

pub const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// How long an ungroup event waits before being treated as deliberate.
    /// Must exceed the browser's own lag between the group change and the
    /// window-close removal of the same tab.
    pub debounce_ms: u64,
    pub default_page_size: usize,
    pub notification_ttl_ms: u64,
    /// Title of the synthetic group a snapshot files ungrouped tabs under.
    pub ungrouped_title: String,
    /// Keyboard command (manifest `commands` key) that triggers a save.
    pub save_command: String,
    pub new_tab_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debounce_ms: 200,
            default_page_size: 7,
            notification_ttl_ms: 200,
            ungrouped_title: "Ungrouped".to_string(),
            save_command: "save-tabs".to_string(),
            new_tab_url: "chrome://newtab/".to_string(),
        }
    }
}

impl Config {
    pub async fn load(backend: &impl StorageBackend) -> Result<Config, StorageError> {
        match backend.get(CONFIG_KEY).await? {
            Some(value) => serde_json::from_value(value).map_err(|source| StorageError::Corrupt {
                key: CONFIG_KEY.to_string(),
                source,
            }),
            None => Ok(Config::default()),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// How far back a window-close marker still explains an ungroup event.
    pub fn window_close_lookback(&self) -> Duration {
        self.debounce() * 2
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }
}
