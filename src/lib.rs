/// Tab Mirror - keeps a durable copy of the browser's tab groups
/// Built with Rust + WASM

pub mod browser;
pub mod chrome;
pub mod clock;
pub mod config;
pub mod error;
pub mod operations;
pub mod query;
pub mod reconciler;
pub mod restore;
pub mod storage;
pub mod tab_data;

#[cfg(test)]
mod testing;

use std::collections::HashSet;
use std::rc::Rc;

use futures::StreamExt;
use futures::channel::mpsc;
use log::{debug, error, info};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::browser::EventSource;
use crate::chrome::{ChromeBrowser, ChromeEvents, ChromeStorage, JsClock};
use crate::config::Config;
use crate::error::Error;
use crate::operations::TabKeeper;
use crate::storage::Store;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

impl From<Error> for JsValue {
    fn from(err: Error) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

type ChromeKeeper = TabKeeper<ChromeStorage, ChromeBrowser, JsClock>;

async fn keeper() -> Result<ChromeKeeper, Error> {
    let config = Config::load(&ChromeStorage).await?;
    Ok(TabKeeper::new(
        Rc::new(Store::new(ChromeStorage)),
        Rc::new(ChromeBrowser),
        Rc::new(JsClock),
        Rc::new(config),
    ))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|err| js_sys::Error::new(&err.to_string()).into())
}

/// Starts mirroring browser events into storage.
///
/// Listeners are registered before the first await so a waking service
/// worker sees the event that woke it; events queue until the
/// configuration is loaded.
#[wasm_bindgen]
pub fn start_background() {
    let (sender, mut receiver) = mpsc::unbounded();
    ChromeEvents.subscribe(Rc::new(move |event| {
        if let Err(err) = sender.unbounded_send(event) {
            debug!("event dropped: {}", err);
        }
    }));

    spawn_local(async move {
        let reconciler = match keeper().await {
            Ok(keeper) => keeper.reconciler(),
            Err(err) => {
                error!("background reconciler not started: {}", err);
                return;
            }
        };
        info!("background reconciler started");
        while let Some(event) = receiver.next().await {
            let reconciler = reconciler.clone();
            spawn_local(async move { reconciler.dispatch(event).await });
        }
    });
}

/// One page of stored groups matching `keyword`. Tabs are included for
/// the ids in `expanded`.
#[wasm_bindgen]
pub async fn list_tab_groups(
    keyword: String,
    expanded: Vec<i32>,
    page: usize,
    page_size: Option<usize>,
) -> Result<JsValue, JsValue> {
    let expanded: HashSet<i32> = expanded.into_iter().collect();
    let page = keeper()
        .await?
        .list(&keyword, &expanded, page, page_size)
        .await?;
    to_js(&page)
}

#[wasm_bindgen]
pub async fn save_tabs() -> Result<JsValue, JsValue> {
    let saved = keeper().await?.save_now().await?;
    to_js(&saved)
}

#[wasm_bindgen]
pub async fn restore_tab_group(group_id: i32) -> Result<JsValue, JsValue> {
    let outcome = keeper().await?.restore(group_id).await?;
    to_js(&outcome)
}

#[wasm_bindgen]
pub async fn delete_tab_group(group_id: i32) -> Result<usize, JsValue> {
    Ok(keeper().await?.delete_group(group_id).await?)
}

#[wasm_bindgen]
pub async fn remove_tab(tab_id: i32) -> Result<bool, JsValue> {
    Ok(keeper().await?.remove_tab(tab_id).await?)
}

#[wasm_bindgen]
pub async fn rename_tab_group(group_id: i32, title: String) -> Result<bool, JsValue> {
    Ok(keeper().await?.rename_group(group_id, &title).await?)
}

#[wasm_bindgen]
pub async fn clear_all() -> Result<(), JsValue> {
    Ok(keeper().await?.clear_all().await?)
}
