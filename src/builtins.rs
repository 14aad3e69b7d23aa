//! Built-in `CAPI` entries every runtime carries.
//!
//! These expose the bridge's own components to scripts: external slots,
//! entity peers, library search paths and script logging. Host code adds its
//! own entries next to them before the registry is sealed.

use rhai::Dynamic;

use crate::error::BridgeResult;
use crate::native_registry::{EntryCall, EntryResult};
use crate::runtime::RuntimeInstance;
use crate::script_log::LogLevel;

pub const BUILTIN_ENTRIES: &[&str] = &[
    "external_set",
    "external_get",
    "external_unset",
    "entity_link",
    "entity_unlink",
    "entity_peer",
    "load_library",
    "log_info",
    "log_warn",
    "log_error",
];

fn or_unit(value: Option<Dynamic>) -> Dynamic {
    value.unwrap_or(Dynamic::UNIT)
}

fn external_set(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let key = call.string(0)?;
    let value = call.take(1)?;
    Ok(or_unit(call.bridge().external_set(&key, value)))
}

fn external_get(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let key = call.string(0)?;
    Ok(or_unit(call.bridge().external_get(&key)))
}

fn external_unset(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let key = call.string(0)?;
    Ok(Dynamic::from(call.bridge().external_unset(&key)))
}

fn entity_link(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let uid = call.int(0)?;
    let peer = call.take(1)?;
    let id = call.bridge().link(uid, peer)?;
    Ok(Dynamic::from(id.to_string()))
}

fn entity_unlink(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let uid = call.int(0)?;
    Ok(or_unit(call.bridge().unlink(uid)))
}

fn entity_peer(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let uid = call.int(0)?;
    Ok(or_unit(call.bridge().lookup(uid)))
}

fn load_library(call: &mut EntryCall<'_, '_>) -> EntryResult {
    let name = call.string(0)?;
    Ok(Dynamic::from(call.bridge().resolve_library(&name)))
}

fn log_with(level: LogLevel, call: &mut EntryCall<'_, '_>) -> EntryResult {
    let message = call.arg(0)?;
    Ok(Dynamic::from(call.bridge().logger().log(level, message)))
}

/// Register the built-in entries on an unsealed runtime.
pub fn register_builtins(runtime: &mut RuntimeInstance) -> BridgeResult<()> {
    runtime.register("external_set", external_set)?;
    runtime.register("external_get", external_get)?;
    runtime.register("external_unset", external_unset)?;
    runtime.register("entity_link", entity_link)?;
    runtime.register("entity_unlink", entity_unlink)?;
    runtime.register("entity_peer", entity_peer)?;
    runtime.register("load_library", load_library)?;
    runtime.register("log_info", |call: &mut EntryCall<'_, '_>| log_with(LogLevel::Info, call))?;
    runtime.register("log_warn", |call: &mut EntryCall<'_, '_>| log_with(LogLevel::Warn, call))?;
    runtime.register("log_error", |call: &mut EntryCall<'_, '_>| log_with(LogLevel::Error, call))?;
    Ok(())
}
