//! Native function registry and the sealed `CAPI` namespace.
//!
//! Native callables are collected in a [`RegistryBuilder`] while the runtime
//! is being set up. Sealing turns the builder into a [`Namespace`]: a
//! read-only dispatch table that is installed into the engine once and
//! published to scripts as the `CAPI` constant. Scripts call entries as
//! methods (`CAPI.external_get("cursor")`); there is no script-visible way to
//! add, replace or remove an entry.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext, INT};
use thiserror::Error;

use crate::bridge::BridgeContext;
use crate::error::{BridgeError, BridgeResult};

/// Prefix of every runtime error raised by a native entry.
pub const ENTRY_ERROR_TAG: &str = "native entry";

/// Most positional arguments an entry can receive through method-call syntax.
pub const MAX_POSITIONAL_ARGS: usize = 8;

/// Namespace helpers that entries may not shadow.
pub const RESERVED_NAMES: &[&str] = &["has", "names", "len", "to_string", "to_debug"];

/// Failure reported by a native entrypoint.
#[derive(Error, Debug)]
pub enum EntryError {
    /// Surfaces as a script-level runtime error the script may catch.
    #[error("{0}")]
    Script(String),
    /// Propagates an error raised by script code during a reentrant call.
    #[error("{0}")]
    Eval(Box<EvalAltResult>),
    /// The host cannot continue; runs the fatal hook.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EntryError {
    pub fn script(message: impl Into<String>) -> Self {
        EntryError::Script(message.into())
    }
}

impl From<Box<EvalAltResult>> for EntryError {
    fn from(err: Box<EvalAltResult>) -> Self {
        EntryError::Eval(err)
    }
}

impl From<BridgeError> for EntryError {
    fn from(err: BridgeError) -> Self {
        EntryError::Script(err.to_string())
    }
}

pub type EntryResult = Result<Dynamic, EntryError>;

/// A native callable exposed to script code.
pub type Entrypoint = Rc<dyn Fn(&mut EntryCall<'_, '_>) -> EntryResult>;

/// Arguments and context of one script-to-native call.
pub struct EntryCall<'c, 'n> {
    name: &'c str,
    args: Vec<Dynamic>,
    context: &'c NativeCallContext<'n>,
    bridge: &'c BridgeContext,
}

impl<'c, 'n> EntryCall<'c, 'n> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn args(&self) -> &[Dynamic] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn bridge(&self) -> &BridgeContext {
        self.bridge
    }

    pub fn arg(&self, index: usize) -> Result<&Dynamic, EntryError> {
        self.args.get(index).ok_or_else(|| {
            EntryError::script(format!("'{}' expects at least {} argument(s)", self.name, index + 1))
        })
    }

    /// Move an argument out of the call, leaving unit in its place.
    pub fn take(&mut self, index: usize) -> Result<Dynamic, EntryError> {
        self.arg(index)?;
        Ok(std::mem::take(&mut self.args[index]))
    }

    pub fn string(&self, index: usize) -> Result<ImmutableString, EntryError> {
        let value = self.arg(index)?;
        value.clone().into_immutable_string().map_err(|actual| {
            EntryError::script(format!(
                "'{}' argument {} must be a string, got {actual}",
                self.name,
                index + 1
            ))
        })
    }

    pub fn int(&self, index: usize) -> Result<INT, EntryError> {
        let value = self.arg(index)?;
        value.as_int().map_err(|actual| {
            EntryError::script(format!(
                "'{}' argument {} must be an integer, got {actual}",
                self.name,
                index + 1
            ))
        })
    }

    /// Call a script function by name from inside this native call.
    pub fn call_script(&self, fn_name: &str, args: Vec<Dynamic>) -> EntryResult {
        let _depth = self.bridge.enter()?;
        Ok(self.context.call_fn::<Dynamic>(fn_name, args)?)
    }

    /// Call a script function pointer (or closure) passed in as an argument.
    pub fn call_ptr(&self, callback: &FnPtr, args: Vec<Dynamic>) -> EntryResult {
        let _depth = self.bridge.enter()?;
        Ok(callback.call_within_context::<Dynamic>(self.context, args)?)
    }
}

fn entry_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("entry name pattern is valid"))
}

/// Collects native entries until the table is sealed.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, Entrypoint)>,
    names: HashSet<String>,
    sealed: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, entry: F) -> BridgeResult<()>
    where
        F: Fn(&mut EntryCall<'_, '_>) -> EntryResult + 'static,
    {
        self.register_entrypoint(name, Rc::new(entry))
    }

    pub fn register_entrypoint(&mut self, name: &str, entry: Entrypoint) -> BridgeResult<()> {
        if self.sealed {
            return Err(BridgeError::AlreadySealed(name.to_string()));
        }
        if !entry_name_pattern().is_match(name) {
            return Err(BridgeError::Configuration(format!("'{name}' is not a valid entry name")));
        }
        if RESERVED_NAMES.contains(&name) || !self.names.insert(name.to_string()) {
            return Err(BridgeError::DuplicateName(name.to_string()));
        }
        self.entries.push((name.to_string(), entry));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Build the namespace. Can only happen once.
    pub fn seal(&mut self) -> BridgeResult<Namespace> {
        if self.sealed {
            return Err(BridgeError::AlreadySealed("<seal>".to_string()));
        }
        self.sealed = true;
        self.names.clear();
        let entries: BTreeMap<String, Entrypoint> = self.entries.drain(..).collect();
        log::debug!("Sealed native registry with {} entries", entries.len());
        Ok(Namespace { table: Rc::new(DispatchTable { entries }) })
    }
}

struct DispatchTable {
    entries: BTreeMap<String, Entrypoint>,
}

/// Sealed, read-only dispatch table. Cloning shares the same table.
#[derive(Clone)]
pub struct Namespace {
    table: Rc<DispatchTable>,
}

impl Namespace {
    pub fn resolve(&self, name: &str) -> Option<Entrypoint> {
        self.table.entries.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.table.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty()
    }

    /// Whether two handles share the same table.
    pub fn same_table(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.table, &other.table)
    }

    /// Register the namespace type and one method per entry and arity.
    pub fn install(&self, engine: &mut Engine, bridge: &BridgeContext) {
        engine
            .register_type_with_name::<Namespace>("NativeApi")
            .register_fn("has", |ns: Namespace, name: ImmutableString| ns.has(&name))
            .register_fn("len", |ns: Namespace| ns.len() as INT)
            .register_fn("names", |ns: Namespace| {
                ns.names().map(|n| Dynamic::from(n.to_string())).collect::<rhai::Array>()
            })
            .register_fn("to_string", |ns: Namespace| ns.to_string())
            .register_fn("to_debug", |ns: Namespace| ns.to_string());

        for (name, entry) in &self.table.entries {
            let dispatch = Rc::new(Dispatch { name: name.clone(), entry: entry.clone(), bridge: bridge.clone() });
            register_methods(engine, name, &dispatch);
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native API: {} entries", self.len())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace").field("entries", &self.table.entries.keys().collect::<Vec<_>>()).finish()
    }
}

struct Dispatch {
    name: String,
    entry: Entrypoint,
    bridge: BridgeContext,
}

impl Dispatch {
    fn invoke(&self, context: &NativeCallContext, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let _depth = self
            .bridge
            .enter()
            .map_err(|err| self.runtime_error(context, &err.to_string()))?;

        let mut call = EntryCall { name: &self.name, args, context, bridge: &self.bridge };
        match (self.entry)(&mut call) {
            Ok(value) => Ok(value),
            Err(EntryError::Script(message)) => Err(self.runtime_error(context, &message)),
            Err(EntryError::Eval(err)) => Err(err),
            Err(EntryError::Fatal(message)) => {
                self.bridge.fatal(&format!("{ENTRY_ERROR_TAG} '{}': {message}", self.name))
            }
        }
    }

    fn runtime_error(&self, context: &NativeCallContext, message: &str) -> Box<EvalAltResult> {
        EvalAltResult::ErrorRuntime(format!("{ENTRY_ERROR_TAG} '{}': {message}", self.name).into(), context.position())
            .into()
    }
}

macro_rules! register_arity {
    ($engine:expr, $name:expr, $dispatch:expr $(, $arg:ident)*) => {{
        let dispatch = Rc::clone($dispatch);
        $engine.register_fn(
            $name,
            move |context: NativeCallContext, _ns: Namespace $(, $arg: Dynamic)*| -> Result<Dynamic, Box<EvalAltResult>> {
                dispatch.invoke(&context, vec![$($arg),*])
            },
        );
    }};
}

fn register_methods(engine: &mut Engine, name: &str, dispatch: &Rc<Dispatch>) {
    register_arity!(engine, name, dispatch);
    register_arity!(engine, name, dispatch, a1);
    register_arity!(engine, name, dispatch, a1, a2);
    register_arity!(engine, name, dispatch, a1, a2, a3);
    register_arity!(engine, name, dispatch, a1, a2, a3, a4);
    register_arity!(engine, name, dispatch, a1, a2, a3, a4, a5);
    register_arity!(engine, name, dispatch, a1, a2, a3, a4, a5, a6);
    register_arity!(engine, name, dispatch, a1, a2, a3, a4, a5, a6, a7);
    register_arity!(engine, name, dispatch, a1, a2, a3, a4, a5, a6, a7, a8);
}
