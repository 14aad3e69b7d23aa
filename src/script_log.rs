//! Logging for script code.
//!
//! Scripts log through the `CAPI.log_info/log_warn/log_error` entries. Messages
//! are forwarded to the `log` facade under the `script` target, tagged with the
//! instance role, and capped per tick so a runaway script cannot flood the host.

use std::cell::Cell;

use crate::runtime::Role;

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Per-instance script logger with a per-tick message budget.
#[derive(Debug)]
pub struct ScriptLogger {
    role: Role,
    max_per_tick: u32,
    count: Cell<u32>,
    warned: Cell<bool>,
}

impl ScriptLogger {
    pub fn new(role: Role, max_per_tick: u32) -> Self {
        Self { role, max_per_tick, count: Cell::new(0), warned: Cell::new(false) }
    }

    /// Reset the per-tick counter. Called at the start of each tick.
    pub fn reset_tick(&self) {
        self.count.set(0);
        self.warned.set(false);
    }

    /// Returns true if under the limit, false if exceeded.
    fn can_log(&self) -> bool {
        let count = self.count.get();
        self.count.set(count.saturating_add(1));
        if count >= self.max_per_tick {
            // Only warn once per tick about exceeding limit
            if !self.warned.replace(true) {
                log::warn!(
                    target: "script",
                    "[{}] script log limit exceeded ({} messages/tick). Further logs dropped.",
                    self.role,
                    self.max_per_tick
                );
            }
            false
        } else {
            true
        }
    }

    /// Log a value from a script, respecting the per-tick limit.
    pub fn log(&self, level: LogLevel, value: &rhai::Dynamic) -> bool {
        if !self.can_log() {
            return false;
        }
        let message = stringify_dynamic(value);
        log::log!(target: "script", level.as_log_level(), "[{}] {}", self.role, message);
        true
    }
}

/// Convert a Rhai Dynamic value to a string safely.
/// Never panics, handles all types gracefully.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    // For arrays, stringify each element
    if value.is_array() {
        if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
            let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
            return parts.join(" ");
        }
    }

    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            let mut parts: Vec<String> =
                map.iter().map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v))).collect();
            parts.sort();
            return format!("{{{}}}", parts.join(", "));
        }
    }

    if let Ok(i) = value.as_int() {
        return i.to_string();
    }

    if let Ok(f) = value.as_float() {
        return format!("{}", f);
    }

    if let Ok(b) = value.as_bool() {
        return b.to_string();
    }

    if value.is_unit() {
        return "()".to_string();
    }

    value.to_string()
}
