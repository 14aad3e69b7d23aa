//! Per-instance bridge state shared by native entries and the runtime.
//!
//! Every component lives behind its own `RefCell` and each operation borrows
//! only for its own duration, so nested native/script/native call chains never
//! observe an outstanding borrow. Call nesting is tracked with an explicit
//! depth counter.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use rhai::{Dynamic, ImmutableString};

use crate::config::BridgeConfig;
use crate::entity_link::{LinkId, LinkRegistry, Uid};
use crate::error::{BridgeError, BridgeResult};
use crate::external::ExternalBroker;
use crate::module_loader::ModuleLoader;
use crate::pin_table::PinTable;
use crate::runtime::Role;
use crate::script_log::ScriptLogger;

/// Called when the host cannot continue. Must not return.
pub type FatalHook = fn(&str) -> !;

/// Log the message and terminate the process.
pub fn exit_process(message: &str) -> ! {
    log::error!("fatal: {message}");
    std::process::exit(1)
}

/// What to do when a caller violates the bridge contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPolicy {
    /// Log and return the error to the caller.
    Report,
    /// Log and run the fatal hook.
    Abort,
}

impl ProtocolPolicy {
    /// Debug builds abort, release builds report.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            ProtocolPolicy::Abort
        } else {
            ProtocolPolicy::Report
        }
    }

    pub fn from_config(strict: Option<bool>) -> Self {
        match strict {
            Some(true) => ProtocolPolicy::Abort,
            Some(false) => ProtocolPolicy::Report,
            None => Self::for_build(),
        }
    }
}

struct BridgeState {
    role: Role,
    externals: RefCell<ExternalBroker>,
    pins: RefCell<PinTable>,
    links: RefCell<LinkRegistry>,
    loader: RefCell<ModuleLoader>,
    logger: ScriptLogger,
    depth: Cell<usize>,
    max_depth: usize,
    policy: ProtocolPolicy,
    fatal: Cell<FatalHook>,
}

/// Cheaply cloneable handle to one instance's bridge state.
#[derive(Clone)]
pub struct BridgeContext {
    inner: Rc<BridgeState>,
}

impl BridgeContext {
    pub fn new(role: Role, loader: ModuleLoader, config: &BridgeConfig) -> Self {
        Self {
            inner: Rc::new(BridgeState {
                role,
                externals: RefCell::new(ExternalBroker::new()),
                pins: RefCell::new(PinTable::new()),
                links: RefCell::new(LinkRegistry::new()),
                loader: RefCell::new(loader),
                logger: ScriptLogger::new(role, config.max_logs_per_tick),
                depth: Cell::new(0),
                max_depth: config.max_call_depth,
                policy: ProtocolPolicy::from_config(config.strict_protocol),
                fatal: Cell::new(exit_process),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn policy(&self) -> ProtocolPolicy {
        self.inner.policy
    }

    pub fn set_fatal_hook(&self, hook: FatalHook) {
        self.inner.fatal.set(hook);
    }

    pub fn fatal(&self, message: &str) -> ! {
        let hook = self.inner.fatal.get();
        hook(&format!("[{}] {message}", self.inner.role))
    }

    /// Apply the protocol policy to an error on its way back to the caller.
    pub fn report(&self, err: BridgeError) -> BridgeError {
        if err.is_protocol() {
            log::error!("[{}] protocol violation: {err}", self.inner.role);
            if self.inner.policy == ProtocolPolicy::Abort {
                self.fatal(&format!("protocol violation: {err}"));
            }
        }
        err
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.inner.logger
    }

    // Call depth

    /// Enter one level of native/script nesting.
    pub fn enter(&self) -> BridgeResult<DepthGuard> {
        let depth = self.inner.depth.get();
        if depth >= self.inner.max_depth {
            return Err(BridgeError::CallDepthExceeded(self.inner.max_depth));
        }
        self.inner.depth.set(depth + 1);
        Ok(DepthGuard { state: Rc::clone(&self.inner) })
    }

    pub fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    // External value broker

    pub fn external_set(&self, key: &str, value: Dynamic) -> Option<Dynamic> {
        self.inner.externals.borrow_mut().set(key, value)
    }

    pub fn external_get(&self, key: &str) -> Option<Dynamic> {
        self.inner.externals.borrow().get(key)
    }

    pub fn external_unset(&self, key: &str) -> bool {
        self.inner.externals.borrow_mut().unset(key)
    }

    pub fn external_len(&self) -> usize {
        self.inner.externals.borrow().len()
    }

    // String pins

    pub fn pin(&self, content: &str) -> ImmutableString {
        self.inner.pins.borrow_mut().pin(content)
    }

    pub fn unpin(&self, content: &str) -> BridgeResult<u32> {
        let result = self.inner.pins.borrow_mut().unpin(content);
        result.map_err(|err| self.report(err))
    }

    /// Pin `content` until the returned guard is dropped.
    pub fn pin_scoped(&self, content: &str) -> PinGuard {
        let value = self.pin(content);
        PinGuard { bridge: self.clone(), value }
    }

    pub fn pin_count(&self, content: &str) -> u32 {
        self.inner.pins.borrow().count(content)
    }

    pub fn pinned_len(&self) -> usize {
        self.inner.pins.borrow().len()
    }

    // Entity links

    pub fn link(&self, uid: Uid, peer: Dynamic) -> BridgeResult<LinkId> {
        let result = self.inner.links.borrow_mut().link(uid, peer);
        result.map_err(|err| self.report(err))
    }

    pub fn lookup(&self, uid: Uid) -> Option<Dynamic> {
        self.inner.links.borrow().lookup(uid)
    }

    pub fn resolve_link(&self, id: LinkId) -> Option<(Uid, Dynamic)> {
        self.inner.links.borrow().resolve(id)
    }

    pub fn link_id(&self, uid: Uid) -> Option<LinkId> {
        self.inner.links.borrow().link_id(uid)
    }

    pub fn unlink(&self, uid: Uid) -> Option<Dynamic> {
        self.inner.links.borrow_mut().unlink(uid)
    }

    pub fn link_count(&self) -> usize {
        self.inner.links.borrow().len()
    }

    // Module loader

    pub fn loader(&self) -> Ref<'_, ModuleLoader> {
        self.inner.loader.borrow()
    }

    pub fn loader_mut(&self) -> RefMut<'_, ModuleLoader> {
        self.inner.loader.borrow_mut()
    }

    pub fn resolve_library(&self, name: &str) -> bool {
        self.inner.loader.borrow_mut().resolve_library(name)
    }

    /// Release all component state. Values are dropped outside the borrows.
    pub fn clear(&self) {
        let slots = self.inner.externals.borrow_mut().drain();
        drop(slots);
        self.inner.pins.borrow_mut().clear();
        let mut links = std::mem::take(&mut *self.inner.links.borrow_mut());
        links.clear();
        self.inner.loader.borrow_mut().clear();
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("role", &self.inner.role)
            .field("depth", &self.inner.depth.get())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

/// Leaves one nesting level on drop.
pub struct DepthGuard {
    state: Rc<BridgeState>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let depth = self.state.depth.get();
        self.state.depth.set(depth.saturating_sub(1));
    }
}

/// Keeps a string pinned for the guard's lifetime.
pub struct PinGuard {
    bridge: BridgeContext,
    value: ImmutableString,
}

impl PinGuard {
    /// The pinned script-visible string.
    pub fn value(&self) -> &ImmutableString {
        &self.value
    }

    pub fn to_dynamic(&self) -> Dynamic {
        Dynamic::from(self.value.clone())
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        if let Err(err) = self.bridge.inner.pins.borrow_mut().unpin(self.value.as_str()) {
            log::error!("[{}] pin guard release failed: {err}", self.bridge.inner.role);
        }
    }
}
