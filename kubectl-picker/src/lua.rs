//! The `kubectl_picker` Lua module.

use k8s_openapi::serde_json::{self, json};
use mlua::prelude::*;
use mlua::{UserData, UserDataMethods};
use serde::Serialize;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::runtime::Runtime;
use tracing::{error, info};

use crate::cmd::KubeClient;
use crate::context::{Listing, LogView, PickerContext};
use crate::error::Error;
use crate::log_session::{LogSession, SessionId};
use crate::logging;
use crate::settings::{Settings, SettingsHandle};
use crate::structs::{CmdUpdateImageArgs, LogTarget, WorkloadRef};

type Context = PickerContext<KubeClient>;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static CONTEXT: Mutex<Option<Arc<Context>>> = Mutex::new(None);

impl From<Error> for LuaError {
    fn from(err: Error) -> Self {
        LuaError::RuntimeError(err.to_string())
    }
}

fn runtime() -> LuaResult<&'static Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = Runtime::new().map_err(LuaError::external)?;
    Ok(RUNTIME.get_or_init(|| rt))
}

fn context() -> LuaResult<Arc<Context>> {
    CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| LuaError::RuntimeError("kubectl_picker is not initialised".into()))
}

fn with_context<F, Fut, R>(f: F) -> LuaResult<R>
where
    F: FnOnce(Arc<Context>) -> Fut,
    Fut: Future<Output = crate::error::Result<R>>,
{
    let rt = runtime()?;
    let ctx = context()?;
    Ok(rt.block_on(f(ctx))?)
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str) -> LuaResult<T> {
    serde_json::from_str(json).map_err(|e| LuaError::external(format!("bad json: {e}")))
}

fn listing_json<T: Serialize>(listing: &Listing<T>) -> LuaResult<String> {
    let value = json!({
        "items": listing.items.as_slice(),
        "scope": listing.scope,
        "stale": listing.stale.as_ref().map(|e| json!({
            "kind": e.kind(),
            "message": e.to_string(),
        })),
    });
    Ok(value.to_string())
}

#[tracing::instrument]
fn init_runtime(
    _lua: &Lua,
    (settings_json, context_name): (Option<String>, Option<String>),
) -> LuaResult<bool> {
    let settings = match settings_json.as_deref() {
        Some(json) => Settings::from_json(json)?,
        None => Settings::default(),
    };
    let settings = Arc::new(SettingsHandle::new(settings));
    let rt = runtime()?;

    let client = rt.block_on(KubeClient::from_kubeconfig(context_name, settings.clone()))?;
    let ctx = Arc::new(PickerContext::new(client, settings));

    let previous = CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(ctx.clone());
    if let Some(previous) = previous {
        info!("replacing picker context");
        previous.shutdown();
    }

    let _guard = rt.enter();
    ctx.start_auto_refresh();
    Ok(true)
}

fn setup(_lua: &Lua, settings_json: String) -> LuaResult<bool> {
    let settings = Settings::from_json(&settings_json)?;
    let ctx = context()?;
    ctx.setup(settings);

    let _guard = runtime()?.enter();
    ctx.start_auto_refresh();
    Ok(true)
}

#[tracing::instrument]
async fn list_pods_async(_lua: Lua, force: Option<bool>) -> LuaResult<String> {
    let listing = with_context(|ctx| async move { ctx.refresh(force.unwrap_or(false)).await })?;
    listing_json(&listing)
}

#[tracing::instrument]
async fn list_namespaces_async(_lua: Lua, force: Option<bool>) -> LuaResult<String> {
    let listing =
        with_context(|ctx| async move { ctx.list_namespaces(force.unwrap_or(false)).await })?;
    listing_json(&listing)
}

async fn current_namespace_async(_lua: Lua, _: ()) -> LuaResult<String> {
    with_context(|ctx| async move { ctx.current_namespace().await })
}

fn toggle_scope(_lua: &Lua, _: ()) -> LuaResult<String> {
    Ok(context()?.toggle_scope().to_string())
}

fn select_namespace(_lua: &Lua, name: String) -> LuaResult<String> {
    Ok(context()?.select_namespace(&name).to_string())
}

fn set_namespace_mode(_lua: &Lua, mode: String) -> LuaResult<String> {
    Ok(context()?.set_namespace_mode(&mode)?.to_string())
}

fn namespace_state(lua: &Lua, _: ()) -> LuaResult<LuaValue> {
    let ctx = context()?;
    let state = ctx.namespace_state();
    lua.to_value(&json!({
        "mode": state.mode().as_str(),
        "selected_namespace": state.selected_namespace(),
        "scope": state.scope_key().as_str(),
    }))
}

/// Without a key every cache entry is dropped.
fn invalidate(_lua: &Lua, key: Option<String>) -> LuaResult<()> {
    with_context(|ctx| async move {
        match key {
            Some(key) => ctx.invalidate_named(&key).await,
            None => {
                ctx.invalidate_all().await;
                Ok(())
            }
        }
    })
}

/// Lua handle to a running log session.
pub struct LuaLogSession {
    session: LogSession,
}

impl UserData for LuaLogSession {
    fn add_methods<M: UserDataMethods<Self>>(m: &mut M) {
        m.add_method("id", |_, this, ()| Ok(this.session.id().get()));
        m.add_method("snapshot", |lua, this, ()| {
            lua.to_value(&this.session.snapshot())
        });
        m.add_method("set_view_row", |_, this, row: usize| {
            this.session.set_view_row(row);
            Ok(())
        });
        m.add_method("status", |lua, this, ()| lua.to_value(&this.session.status()));
        m.add_method("open", |_, this, ()| Ok(this.session.is_live()));
        m.add_method("close", |_, this, ()| {
            let ctx = context()?;
            Ok(ctx.stop_log_session(this.session.id()))
        });
    }
}

/// Returns a `LogSession` userdata, or `{ external = argv }` when logs are
/// meant to open in a terminal.
fn open_logs(lua: &Lua, target_json: String) -> LuaResult<LuaValue> {
    let target: LogTarget = parse_json(&target_json)?;
    let view = with_context(|ctx| async move { ctx.open_log_session(target) })?;

    match view {
        LogView::Session(session) => {
            let ud = lua.create_userdata(LuaLogSession { session })?;
            Ok(LuaValue::UserData(ud))
        }
        LogView::External { command } => {
            let table = lua.create_table()?;
            table.set("external", command)?;
            Ok(LuaValue::Table(table))
        }
    }
}

fn stop_logs(_lua: &Lua, id: u32) -> LuaResult<bool> {
    Ok(context()?.stop_log_session(SessionId::new(id)))
}

#[tracing::instrument]
async fn restart_async(_lua: Lua, json: String) -> LuaResult<String> {
    let workload: WorkloadRef = parse_json(&json)?;
    with_context(|ctx| async move { ctx.restart(&workload).await })
}

#[tracing::instrument]
async fn update_image_async(_lua: Lua, json: String) -> LuaResult<String> {
    let args: CmdUpdateImageArgs = parse_json(&json)?;
    with_context(|ctx| async move {
        ctx.update_image(
            &args.workload,
            &args.container,
            &args.current_image,
            &args.new_tag,
        )
        .await
    })
}

fn pop_events(lua: &Lua, _: ()) -> LuaResult<LuaValue> {
    lua.to_value(&context()?.pop_events())
}

fn shutdown(_lua: &Lua, _: ()) -> LuaResult<()> {
    let ctx = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(ctx) = ctx {
        ctx.shutdown();
    }
    logging::shutdown();
    Ok(())
}

#[mlua::lua_module(skip_memory_check)]
fn kubectl_picker(lua: &Lua) -> LuaResult<mlua::Table> {
    let exports = lua.create_table()?;
    exports.set(
        "init_logging",
        lua.create_function(|_, path: String| {
            logging::setup_logger(&path, "http://localhost:4317")
                .map_err(|e| LuaError::external(format!("{:?}", e)))?;
            Ok(())
        })?,
    )?;

    let default = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let bt = Backtrace::force_capture();
        error!(target: "panic", "panic: {panic_info}\n\nBacktrace:\n{bt}");
        default(panic_info);
    }));

    exports.set("init_runtime", lua.create_function(init_runtime)?)?;
    exports.set("setup", lua.create_function(setup)?)?;
    exports.set(
        "list_pods_async",
        lua.create_async_function(list_pods_async)?,
    )?;
    exports.set(
        "list_namespaces_async",
        lua.create_async_function(list_namespaces_async)?,
    )?;
    exports.set(
        "current_namespace_async",
        lua.create_async_function(current_namespace_async)?,
    )?;
    exports.set("toggle_scope", lua.create_function(toggle_scope)?)?;
    exports.set("select_namespace", lua.create_function(select_namespace)?)?;
    exports.set(
        "set_namespace_mode",
        lua.create_function(set_namespace_mode)?,
    )?;
    exports.set("namespace_state", lua.create_function(namespace_state)?)?;
    exports.set("invalidate", lua.create_function(invalidate)?)?;
    exports.set("open_logs", lua.create_function(open_logs)?)?;
    exports.set("stop_logs", lua.create_function(stop_logs)?)?;
    exports.set("restart_async", lua.create_async_function(restart_async)?)?;
    exports.set(
        "update_image_async",
        lua.create_async_function(update_image_async)?,
    )?;
    exports.set("pop_events", lua.create_function(pop_events)?)?;
    exports.set("shutdown", lua.create_function(shutdown)?)?;

    Ok(exports)
}
