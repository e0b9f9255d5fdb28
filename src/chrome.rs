/// Bindings to the chrome.* extension APIs
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::browser::{
    Browser, BrowserEvent, BrowserResult, CreateTab, EventListener, EventSource, GroupUpdate,
    TabChange, TabQuery,
};
use crate::clock::Clock;
use crate::error::{BrowserError, StorageError};
use crate::storage::StorageBackend;
use crate::tab_data::{LiveGroup, LiveTab};

const NOTIFICATION_ICON: &str = "icons/icon-128.png";

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabGroups"], js_name = get)]
    async fn tab_groups_get(group_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabGroups"], js_name = query)]
    async fn tab_groups_query(query: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabGroups"], js_name = update)]
    async fn tab_groups_update(group_id: i32, props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = query)]
    async fn tabs_query(query: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = get)]
    async fn tabs_get(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = create)]
    async fn tabs_create(props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = remove)]
    async fn tabs_remove(tab_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = group)]
    async fn tabs_group(options: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = highlight)]
    async fn tabs_highlight(info: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "windows"], js_name = create)]
    async fn windows_create(props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "windows"], js_name = update)]
    async fn windows_update(window_id: i32, props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "notifications"], js_name = create)]
    async fn notifications_create(id: &str, options: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "notifications"], js_name = clear)]
    async fn notifications_clear(id: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = get)]
    async fn storage_get(keys: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = set)]
    async fn storage_set(items: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = remove)]
    async fn storage_remove(keys: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &js_sys::Function, millis: i32) -> JsValue;

    /// A `chrome.events.Event`
    type ChromeEvent;

    #[wasm_bindgen(method, js_name = addListener)]
    fn add_listener(this: &ChromeEvent, listener: &js_sys::Function);
}

fn js_message(err: &JsValue) -> String {
    if let Some(message) = err.as_string() {
        return message;
    }
    match err.dyn_ref::<js_sys::Error>() {
        Some(error) => String::from(error.message()),
        None => format!("{:?}", err),
    }
}

fn api_error(call: &'static str) -> impl Fn(JsValue) -> BrowserError {
    move |err| BrowserError::Api {
        call,
        message: js_message(&err),
    }
}

fn decode<T: DeserializeOwned>(call: &'static str, value: JsValue) -> BrowserResult<T> {
    serde_wasm_bindgen::from_value(value).map_err(|err| BrowserError::Decode {
        call,
        message: err.to_string(),
    })
}

fn encode<T: Serialize + ?Sized>(call: &'static str, value: &T) -> BrowserResult<JsValue> {
    to_js(value).map_err(|err| BrowserError::Api {
        call,
        message: format!("could not encode arguments: {}", err),
    })
}

/// Plain JS objects rather than `Map`s, as the chrome.* APIs expect.
fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

#[derive(Deserialize)]
struct WindowInfo {
    id: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupOptions<'a> {
    tab_ids: &'a [i32],
    create_properties: GroupCreateProperties,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupCreateProperties {
    window_id: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HighlightInfo {
    window_id: i32,
    tabs: Vec<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationOptions<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    icon_url: &'a str,
    title: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveInfo {
    to_index: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveInfo {
    #[serde(default)]
    is_window_closing: bool,
}

/// `Browser` over chrome.tabs, chrome.tabGroups, chrome.windows and
/// chrome.notifications
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeBrowser;

impl Browser for ChromeBrowser {
    async fn get_group(&self, group_id: i32) -> BrowserResult<Option<LiveGroup>> {
        // Rejects when no group has this id.
        match tab_groups_get(group_id).await {
            Ok(group) => decode("tabGroups.get", group).map(Some),
            Err(err) => {
                debug!("group {} is not open: {}", group_id, js_message(&err));
                Ok(None)
            }
        }
    }

    async fn query_groups(&self) -> BrowserResult<Vec<LiveGroup>> {
        let groups = tab_groups_query(js_sys::Object::new().into())
            .await
            .map_err(api_error("tabGroups.query"))?;
        decode("tabGroups.query", groups)
    }

    async fn query_tabs(&self, query: TabQuery) -> BrowserResult<Vec<LiveTab>> {
        let tabs = tabs_query(encode("tabs.query", &query)?)
            .await
            .map_err(api_error("tabs.query"))?;
        decode("tabs.query", tabs)
    }

    async fn create_window(&self) -> BrowserResult<i32> {
        let props = encode("windows.create", &serde_json::json!({ "focused": true }))?;
        let window = windows_create(props)
            .await
            .map_err(api_error("windows.create"))?;
        let window: WindowInfo = decode("windows.create", window)?;
        Ok(window.id)
    }

    async fn create_tab(&self, props: CreateTab) -> BrowserResult<LiveTab> {
        let tab = tabs_create(encode("tabs.create", &props)?)
            .await
            .map_err(api_error("tabs.create"))?;
        decode("tabs.create", tab)
    }

    async fn remove_tab(&self, tab_id: i32) -> BrowserResult<()> {
        tabs_remove(tab_id).await.map_err(api_error("tabs.remove"))
    }

    async fn group_tabs(&self, tab_ids: &[i32], window_id: i32) -> BrowserResult<i32> {
        let options = GroupOptions {
            tab_ids,
            create_properties: GroupCreateProperties { window_id },
        };
        let group_id = tabs_group(encode("tabs.group", &options)?)
            .await
            .map_err(api_error("tabs.group"))?;
        decode("tabs.group", group_id)
    }

    async fn update_group(&self, group_id: i32, update: GroupUpdate) -> BrowserResult<()> {
        tab_groups_update(group_id, encode("tabGroups.update", &update)?)
            .await
            .map_err(api_error("tabGroups.update"))?;
        Ok(())
    }

    async fn focus_tabs(&self, tab_ids: &[i32]) -> BrowserResult<()> {
        let mut tabs = Vec::with_capacity(tab_ids.len());
        for tab_id in tab_ids {
            let tab = tabs_get(*tab_id).await.map_err(api_error("tabs.get"))?;
            tabs.push(decode::<LiveTab>("tabs.get", tab)?);
        }
        let Some(window_id) = tabs.first().map(|tab| tab.window_id) else {
            return Ok(());
        };

        let props = encode("windows.update", &serde_json::json!({ "focused": true }))?;
        windows_update(window_id, props)
            .await
            .map_err(api_error("windows.update"))?;

        let info = HighlightInfo {
            window_id,
            tabs: tabs
                .iter()
                .filter(|tab| tab.window_id == window_id)
                .map(|tab| tab.index)
                .collect(),
        };
        tabs_highlight(encode("tabs.highlight", &info)?)
            .await
            .map_err(api_error("tabs.highlight"))?;
        Ok(())
    }

    async fn notify(&self, id: &str, title: &str, message: &str) -> BrowserResult<()> {
        let options = NotificationOptions {
            kind: "basic",
            icon_url: NOTIFICATION_ICON,
            title,
            message,
        };
        notifications_create(id, encode("notifications.create", &options)?)
            .await
            .map_err(api_error("notifications.create"))?;
        Ok(())
    }

    async fn clear_notification(&self, id: &str) -> BrowserResult<()> {
        notifications_clear(id)
            .await
            .map_err(api_error("notifications.clear"))?;
        Ok(())
    }
}

/// Looks up `chrome.<path>` on the global object.
fn chrome_event(path: &[&str]) -> Result<ChromeEvent, JsValue> {
    let mut target: JsValue = js_sys::global().into();
    for name in std::iter::once(&"chrome").chain(path) {
        target = js_sys::Reflect::get(&target, &JsValue::from_str(name))?;
        if target.is_undefined() {
            return Err(JsValue::from_str(&format!("chrome.{} is not available", path.join("."))));
        }
    }
    Ok(target.unchecked_into())
}

fn listen(path: &[&str], listener: &js_sys::Function) {
    match chrome_event(path) {
        Ok(event) => event.add_listener(listener),
        Err(err) => warn!("could not listen to {}: {}", path.join("."), js_message(&err)),
    }
}

fn decode_event<T: DeserializeOwned>(name: &str, value: JsValue) -> Option<T> {
    match serde_wasm_bindgen::from_value(value) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("dropping {} event: {}", name, err);
            None
        }
    }
}

/// `EventSource` over the chrome.tabs, chrome.tabGroups and chrome.commands
/// event feeds
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeEvents;

impl EventSource for ChromeEvents {
    fn subscribe(&self, listener: EventListener) {
        let emit = listener.clone();
        let on_created = Closure::wrap(Box::new(move |tab: JsValue| {
            if let Some(tab) = decode_event("tabs.onCreated", tab) {
                emit(BrowserEvent::TabCreated(tab));
            }
        }) as Box<dyn FnMut(JsValue)>);
        listen(&["tabs", "onCreated"], on_created.as_ref().unchecked_ref());
        on_created.forget();

        let emit = listener.clone();
        let on_updated = Closure::wrap(Box::new(move |tab_id: i32, change: JsValue, tab: JsValue| {
            let change = decode_event::<TabChange>("tabs.onUpdated", change);
            let tab = decode_event::<LiveTab>("tabs.onUpdated", tab);
            if let (Some(change), Some(tab)) = (change, tab) {
                emit(BrowserEvent::TabUpdated {
                    tab_id,
                    change,
                    tab,
                });
            }
        }) as Box<dyn FnMut(i32, JsValue, JsValue)>);
        listen(&["tabs", "onUpdated"], on_updated.as_ref().unchecked_ref());
        on_updated.forget();

        let emit = listener.clone();
        let on_moved = Closure::wrap(Box::new(move |tab_id: i32, info: JsValue| {
            if let Some(info) = decode_event::<MoveInfo>("tabs.onMoved", info) {
                emit(BrowserEvent::TabMoved {
                    tab_id,
                    to_index: info.to_index,
                });
            }
        }) as Box<dyn FnMut(i32, JsValue)>);
        listen(&["tabs", "onMoved"], on_moved.as_ref().unchecked_ref());
        on_moved.forget();

        let emit = listener.clone();
        let on_removed = Closure::wrap(Box::new(move |tab_id: i32, info: JsValue| {
            if let Some(info) = decode_event::<RemoveInfo>("tabs.onRemoved", info) {
                emit(BrowserEvent::TabRemoved {
                    tab_id,
                    is_window_closing: info.is_window_closing,
                });
            }
        }) as Box<dyn FnMut(i32, JsValue)>);
        listen(&["tabs", "onRemoved"], on_removed.as_ref().unchecked_ref());
        on_removed.forget();

        let emit = listener.clone();
        let on_group_created = Closure::wrap(Box::new(move |group: JsValue| {
            if let Some(group) = decode_event("tabGroups.onCreated", group) {
                emit(BrowserEvent::GroupCreated(group));
            }
        }) as Box<dyn FnMut(JsValue)>);
        listen(&["tabGroups", "onCreated"], on_group_created.as_ref().unchecked_ref());
        on_group_created.forget();

        let emit = listener.clone();
        let on_group_updated = Closure::wrap(Box::new(move |group: JsValue| {
            if let Some(group) = decode_event("tabGroups.onUpdated", group) {
                emit(BrowserEvent::GroupUpdated(group));
            }
        }) as Box<dyn FnMut(JsValue)>);
        listen(&["tabGroups", "onUpdated"], on_group_updated.as_ref().unchecked_ref());
        on_group_updated.forget();

        let emit = listener;
        let on_command = Closure::wrap(Box::new(move |command: String| {
            emit(BrowserEvent::Command(command));
        }) as Box<dyn FnMut(String)>);
        listen(&["commands", "onCommand"], on_command.as_ref().unchecked_ref());
        on_command.forget();
    }
}

fn storage_error(err: JsValue) -> StorageError {
    StorageError::Unavailable(js_message(&err))
}

fn to_json(key: &str, value: JsValue) -> Result<Value, StorageError> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|err| StorageError::Unavailable(format!("could not read {}: {}", key, err)))
}

/// `StorageBackend` over chrome.storage.local
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeStorage;

impl StorageBackend for ChromeStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let items = storage_get(JsValue::from_str(key))
            .await
            .map_err(storage_error)?;
        let value = js_sys::Reflect::get(&items, &JsValue::from_str(key)).map_err(storage_error)?;
        if value.is_undefined() {
            return Ok(None);
        }
        to_json(key, value).map(Some)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        // `get(null)` returns every stored item.
        let items = storage_get(JsValue::NULL).await.map_err(storage_error)?;
        let items: js_sys::Object = items
            .dyn_into()
            .map_err(|_| StorageError::Unavailable("storage.get did not return an object".to_string()))?;

        let mut entries = Vec::new();
        for entry in js_sys::Object::entries(&items).iter() {
            let entry: js_sys::Array = entry.unchecked_into();
            let Some(key) = entry.get(0).as_string() else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let value = to_json(&key, entry.get(1))?;
            entries.push((key, value));
        }
        entries.sort_by(|(left, _), (right, _)| left.cmp(right));
        Ok(entries)
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let items: serde_json::Map<String, Value> = entries.into_iter().collect();
        let items = to_js(&items).map_err(|err| StorageError::Unavailable(err.to_string()))?;
        storage_set(items).await.map_err(storage_error)
    }

    async fn remove(&self, keys: Vec<String>) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = to_js(&keys).map_err(|err| StorageError::Unavailable(err.to_string()))?;
        storage_remove(keys).await.map_err(storage_error)
    }
}

/// `Clock` over `Date.now()` and `setTimeout`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsClock;

impl Clock for JsClock {
    fn now(&self) -> i64 {
        js_sys::Date::now() as i64
    }

    async fn sleep(&self, duration: Duration) {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            set_timeout(&resolve, millis);
        });
        if let Err(err) = JsFuture::from(promise).await {
            warn!("timer failed: {}", js_message(&err));
        }
    }
}
