//! One embedded scripting runtime per host role.
//!
//! A [`RuntimeInstance`] owns its own rhai `Engine`, the function set of every
//! module it has executed, its native registry and its bridge state. Nothing
//! is process-wide, so a client and a server instance can live side by side
//! (or in isolation under test).
//!
//! Lifecycle:
//! - `register` native entries while unsealed
//! - `bootstrap()` seals the registry, publishes `CLIENT`/`SERVER`/
//!   `CFG_VERSION`/`CAPI` and loads the bootstrap module
//! - `call`/`tick`/`call_peer` from the host tick
//! - `teardown()` at shutdown
//!
//! Each module runs in its own scope seeded with the published globals, so
//! top-level `let` bindings stay module-local. Modules share data through
//! external slots.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Scope, AST, FLOAT};

use crate::bridge::{BridgeContext, FatalHook, PinGuard};
use crate::builtins::register_builtins;
use crate::config::{BridgeConfig, CFG_VERSION};
use crate::entity_link::{LinkId, Uid};
use crate::error::{BridgeError, BridgeResult};
use crate::module_loader::{ModuleLoader, ModuleSource};
use crate::native_registry::{EntryCall, EntryResult, Namespace, RegistryBuilder, RESERVED_NAMES};
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};

/// Name of the script function driven by [`RuntimeInstance::tick`].
pub const TICK_FUNCTION: &str = "tick";

const MAX_DIAGNOSTICS: usize = 32;

/// Host role an instance runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(self) -> bool {
        self == Role::Client
    }

    pub fn is_server(self) -> bool {
        self == Role::Server
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(format!("unknown role '{other}' (expected 'client' or 'server')")),
        }
    }
}

pub struct RuntimeInstance {
    role: Role,
    config: BridgeConfig,
    engine: Engine,
    /// Functions of every executed module; top-level statements are dropped.
    functions: AST,
    registry: RegistryBuilder,
    namespace: Option<Namespace>,
    bridge: BridgeContext,
    diagnostics: Vec<ScriptDiagnostic>,
    bootstrapped: bool,
}

impl RuntimeInstance {
    /// Create an instance. Fails on an invalid search-path configuration.
    pub fn new(role: Role, config: BridgeConfig) -> BridgeResult<Self> {
        let loader = ModuleLoader::new(&config)?;
        let templates = loader.search_path().templates().len();
        let bridge = BridgeContext::new(role, loader, &config);

        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(config.max_call_depth);
        engine.set_max_operations(config.max_operations);
        engine.set_allow_shadowing(false);

        log::info!(
            "Created {role} scripting runtime ({templates} search templates, protocol policy {:?})",
            bridge.policy()
        );

        Ok(Self {
            role,
            config,
            engine,
            functions: AST::empty(),
            registry: RegistryBuilder::new(),
            namespace: None,
            bridge,
            diagnostics: Vec::new(),
            bootstrapped: false,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn bridge(&self) -> &BridgeContext {
        &self.bridge
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.namespace.is_some()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn set_fatal_hook(&self, hook: FatalHook) {
        self.bridge.set_fatal_hook(hook);
    }

    /// Register a native entry. Only allowed before the registry is sealed.
    pub fn register<F>(&mut self, name: &str, entry: F) -> BridgeResult<()>
    where
        F: Fn(&mut EntryCall<'_, '_>) -> EntryResult + 'static,
    {
        let result = self.registry.register(name, entry);
        result.map_err(|err| self.bridge.report(err))
    }

    /// Seal the registry and install the namespace into the engine.
    pub fn seal(&mut self) -> BridgeResult<Namespace> {
        let namespace = self.registry.seal().map_err(|err| self.bridge.report(err))?;
        namespace.install(&mut self.engine, &self.bridge);
        self.publish_globals(&namespace);
        self.namespace = Some(namespace.clone());
        Ok(namespace)
    }

    /// Script functions cannot see the caller's scope, so the globals are
    /// also served by a variable resolver. Resolved values are read-only.
    fn publish_globals(&mut self, namespace: &Namespace) {
        let role = self.role;
        let namespace = namespace.clone();
        self.engine.on_var(move |name, _, _| {
            Ok(match name {
                "CAPI" => Some(Dynamic::from(namespace.clone())),
                "CLIENT" => Some(Dynamic::from(role.is_client())),
                "SERVER" => Some(Dynamic::from(role.is_server())),
                "CFG_VERSION" => Some(Dynamic::from(CFG_VERSION)),
                _ => None,
            })
        });
    }

    /// Register built-ins, seal, publish globals and run the bootstrap module.
    ///
    /// A second call on a bootstrapped instance does nothing.
    pub fn bootstrap(&mut self) -> BridgeResult<()> {
        if self.bootstrapped {
            log::debug!("{} runtime already bootstrapped", self.role);
            return Ok(());
        }
        if !self.is_sealed() {
            register_builtins(self)?;
            let namespace = self.seal()?;
            log::info!("{} runtime sealed {namespace}", self.role);
        }

        let name = self.config.bootstrap_module.clone();
        self.try_load(&name)?;
        self.bootstrapped = true;
        Ok(())
    }

    /// Scope seeded with the published globals.
    fn globals_scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        scope
            .push_constant("CLIENT", self.role.is_client())
            .push_constant("SERVER", self.role.is_server())
            .push_constant("CFG_VERSION", CFG_VERSION);
        if let Some(namespace) = &self.namespace {
            scope.push_constant("CAPI", namespace.clone());
        }
        scope
    }

    /// Load a module requested at runtime. Failures are logged and reported
    /// as `false`; the instance keeps running.
    pub fn load(&mut self, name: &str) -> bool {
        match self.try_load(name) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("{} runtime failed to load module '{name}': {err}", self.role);
                false
            }
        }
    }

    /// Resolve and execute a module, returning the file that ran.
    pub fn try_load(&mut self, name: &str) -> BridgeResult<PathBuf> {
        if !self.is_sealed() {
            return Err(BridgeError::NotBootstrapped);
        }
        let module = self.bridge.loader().read(name)?;
        log::debug!("Loading {} module '{name}' from {}", self.role, module.path.display());
        let path = module.path.clone();
        self.execute(module)?;
        Ok(path)
    }

    fn execute(&mut self, module: ModuleSource) -> BridgeResult<()> {
        let ast = match self.engine.compile(&module.source) {
            Ok(ast) => ast,
            Err(err) => {
                self.push_diagnostic(from_parse_error(&module.name, &err));
                return Err(BridgeError::ModuleCompile { name: module.name, message: err.to_string() });
            }
        };

        // Script functions take precedence over registered ones, so a module
        // defining an entry's name would redirect `CAPI.<name>(..)` calls.
        if let Some(entry) = ast.iter_functions().map(|f| f.name).find(|name| self.is_protected_name(name)) {
            return Err(BridgeError::ModuleRedefinesEntry { name: module.name, entry: entry.to_string() });
        }

        let merged = self.functions.merge(&ast);
        let mut scope = self.globals_scope();
        let result = {
            let _depth = self.bridge.enter()?;
            self.engine.run_ast_with_scope(&mut scope, &merged)
        };
        if let Err(err) = result {
            self.push_diagnostic(from_eval_error(ScriptPhase::Load, &module.name, &err));
            return Err(BridgeError::ModuleExecute { name: module.name, message: err.to_string() });
        }

        self.functions = merged.clone_functions_only();
        self.bridge.loader_mut().record_loaded(&module);
        Ok(())
    }

    fn is_protected_name(&self, name: &str) -> bool {
        RESERVED_NAMES.contains(&name) || self.namespace.as_ref().is_some_and(|ns| ns.has(name))
    }

    /// Re-run every loaded module whose file changed. Returns the modules that
    /// reloaded successfully.
    pub fn reload_changed(&mut self) -> Vec<String> {
        let changed = self.bridge.loader().changed_modules();
        changed.into_iter().filter(|name| self.load(name)).collect()
    }

    /// Call a script function from native code.
    pub fn call(&mut self, fn_name: &str, args: Vec<Dynamic>) -> BridgeResult<Dynamic> {
        if !self.is_sealed() {
            return Err(BridgeError::NotBootstrapped);
        }
        let mut scope = self.globals_scope();
        let result = {
            let _depth = self.bridge.enter().map_err(|err| self.bridge.report(err))?;
            self.engine.call_fn::<Dynamic>(&mut scope, &self.functions, fn_name, args)
        };
        result.map_err(|err| self.call_error(fn_name, &err))
    }

    /// Like [`call`](Self::call), but a missing function is `Ok(None)`.
    pub fn call_optional(&mut self, fn_name: &str, args: Vec<Dynamic>) -> BridgeResult<Option<Dynamic>> {
        if !self.has_function(fn_name) {
            return Ok(None);
        }
        self.call(fn_name, args).map(Some)
    }

    /// Call `fn_name(peer, args..)` for the peer linked to `uid`.
    ///
    /// Entities without a peer are skipped with `Ok(None)`.
    pub fn call_peer(&mut self, uid: Uid, fn_name: &str, mut args: Vec<Dynamic>) -> BridgeResult<Option<Dynamic>> {
        let peer = match self.bridge.lookup(uid) {
            Some(peer) => peer,
            None => {
                log::debug!("{} entity {uid} has no script peer; skipping '{fn_name}'", self.role);
                return Ok(None);
            }
        };
        args.insert(0, peer);
        self.call(fn_name, args).map(Some)
    }

    /// Per-tick entry point: resets the script log budget and calls `tick(dt)`
    /// if the loaded modules define it.
    pub fn tick(&mut self, dt: FLOAT) -> BridgeResult<()> {
        self.bridge.logger().reset_tick();
        self.call_optional(TICK_FUNCTION, vec![Dynamic::from(dt)]).map(|_| ())
    }

    pub fn has_function(&self, fn_name: &str) -> bool {
        self.functions.iter_functions().any(|f| f.name == fn_name)
    }

    fn call_error(&mut self, fn_name: &str, err: &EvalAltResult) -> BridgeError {
        self.push_diagnostic(from_eval_error(ScriptPhase::Call, fn_name, err));
        BridgeError::Script { function: fn_name.to_string(), message: err.to_string() }
    }

    // Convenience pass-throughs for native callers.

    pub fn pin(&self, content: &str) -> ImmutableString {
        self.bridge.pin(content)
    }

    pub fn unpin(&self, content: &str) -> BridgeResult<u32> {
        self.bridge.unpin(content)
    }

    pub fn pin_scoped(&self, content: &str) -> PinGuard {
        self.bridge.pin_scoped(content)
    }

    pub fn link(&self, uid: Uid, peer: Dynamic) -> BridgeResult<LinkId> {
        self.bridge.link(uid, peer)
    }

    pub fn unlink(&self, uid: Uid) -> Option<Dynamic> {
        self.bridge.unlink(uid)
    }

    pub fn lookup(&self, uid: Uid) -> Option<Dynamic> {
        self.bridge.lookup(uid)
    }

    pub fn external_set(&self, key: &str, value: Dynamic) -> Option<Dynamic> {
        self.bridge.external_set(key, value)
    }

    pub fn external_get(&self, key: &str) -> Option<Dynamic> {
        self.bridge.external_get(key)
    }

    pub fn external_unset(&self, key: &str) -> bool {
        self.bridge.external_unset(key)
    }

    fn push_diagnostic(&mut self, diag: ScriptDiagnostic) {
        self.diagnostics.push(diag);
        if self.diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = self.diagnostics.len() - MAX_DIAGNOSTICS;
            self.diagnostics.drain(0..excess);
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.diagnostics.last().map(|d| d.message.as_str())
    }

    /// Drain and return all pending diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<ScriptDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Release every component's state. The instance cannot run scripts
    /// afterwards.
    pub fn teardown(&mut self) {
        self.functions = AST::empty();
        self.diagnostics.clear();
        self.bridge.clear();
        log::info!("Tore down {} scripting runtime", self.role);
    }
}

impl fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("role", &self.role)
            .field("sealed", &self.is_sealed())
            .field("bootstrapped", &self.bootstrapped)
            .finish()
    }
}
