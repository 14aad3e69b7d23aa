//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. The bridge
//! wraps those into a stable, JSON-serializable diagnostic format so the host
//! can surface script failures without scraping logs.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in script code.
    RuntimeError,
    /// Script attempted to use the native API incorrectly (missing entries, wrong types, etc).
    HostApiMisuse,
    /// Error raised by a native entrypoint.
    HostError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    /// Top-level execution of a module.
    Load,
    /// Native code calling a script function.
    Call,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    /// Module being compiled/loaded, or the function being called.
    pub source: String,
    pub message: String,
    pub location: Option<ScriptLocation>,
}

fn classify_error(err: &rhai::EvalAltResult) -> ScriptDiagnosticKind {
    use rhai::EvalAltResult::*;

    match err {
        ErrorFunctionNotFound(..)
        | ErrorVariableNotFound(..)
        | ErrorPropertyNotFound(..)
        | ErrorMismatchDataType(..)
        | ErrorMismatchOutputType(..)
        | ErrorAssignmentToConstant(..)
        | ErrorIndexNotFound(..) => ScriptDiagnosticKind::HostApiMisuse,
        ErrorInFunctionCall(_, _, inner, _) => classify_error(inner),
        ErrorRuntime(..) => {
            // Native entry failures surface as runtime errors tagged by the bridge.
            if err.to_string().contains(crate::native_registry::ENTRY_ERROR_TAG) {
                ScriptDiagnosticKind::HostError
            } else {
                ScriptDiagnosticKind::RuntimeError
            }
        }
        _ => ScriptDiagnosticKind::RuntimeError,
    }
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(0) as u32;
    Some(ScriptLocation { line, column: column.max(1) })
}

pub fn from_parse_error(source: &str, err: &rhai::ParseError) -> ScriptDiagnostic {
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        source: source.to_string(),
        message: err.to_string(),
        location: location_of(err.position()),
    }
}

pub fn from_eval_error(phase: ScriptPhase, source: &str, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    ScriptDiagnostic {
        kind: classify_error(err),
        phase,
        source: source.to_string(),
        message: err.to_string(),
        location: location_of(err.position()),
    }
}
