//! Per-role runtime lifecycle.
//!
//! The manager owns at most one [`RuntimeInstance`] per [`Role`]. Creating an
//! instance twice hands back the existing one; tearing it down releases every
//! component it owns. A failed bootstrap is not recoverable and runs the
//! fatal hook.

use crate::bridge::{exit_process, FatalHook};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{Role, RuntimeInstance};

/// Host callback run before and after long synchronous bridge work so other
/// subsystems (e.g. network connections) can be serviced.
pub type KeepAliveHook = Box<dyn FnMut(Role)>;

pub struct RuntimeManager {
    client: Option<RuntimeInstance>,
    server: Option<RuntimeInstance>,
    fatal: FatalHook,
    keep_alive: Option<KeepAliveHook>,
}

impl Default for RuntimeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeManager {
    pub fn new() -> Self {
        Self { client: None, server: None, fatal: exit_process, keep_alive: None }
    }

    /// Fatal hook for every instance, current and future.
    pub fn set_fatal_hook(&mut self, hook: FatalHook) {
        self.fatal = hook;
        for instance in [self.client.as_ref(), self.server.as_ref()].into_iter().flatten() {
            instance.set_fatal_hook(hook);
        }
    }

    pub fn set_keep_alive(&mut self, hook: Option<KeepAliveHook>) {
        self.keep_alive = hook;
    }

    fn slot(&self, role: Role) -> &Option<RuntimeInstance> {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<RuntimeInstance> {
        match role {
            Role::Client => &mut self.client,
            Role::Server => &mut self.server,
        }
    }

    /// Create the instance for `role`. An existing instance is returned
    /// unchanged and `config` is ignored.
    pub fn create(&mut self, role: Role, config: BridgeConfig) -> BridgeResult<&mut RuntimeInstance> {
        let fatal = self.fatal;
        let slot = self.slot_mut(role);
        if slot.is_some() {
            log::debug!("{role} runtime already exists; keeping it");
        } else {
            let instance = RuntimeInstance::new(role, config)?;
            instance.set_fatal_hook(fatal);
            *slot = Some(instance);
        }
        slot.as_mut().ok_or_else(|| BridgeError::not_found("runtime", role.to_string()))
    }

    pub fn exists(&self, role: Role) -> bool {
        self.slot(role).is_some()
    }

    pub fn get(&self, role: Role) -> Option<&RuntimeInstance> {
        self.slot(role).as_ref()
    }

    pub fn get_mut(&mut self, role: Role) -> Option<&mut RuntimeInstance> {
        self.slot_mut(role).as_mut()
    }

    fn instance_mut(&mut self, role: Role) -> BridgeResult<&mut RuntimeInstance> {
        self.get_mut(role).ok_or_else(|| BridgeError::not_found("runtime", role.to_string()))
    }

    fn keep_alive(&mut self, role: Role) {
        if let Some(hook) = self.keep_alive.as_mut() {
            hook(role);
        }
    }

    /// Seal the namespace, publish globals and run the bootstrap module.
    ///
    /// Any failure after the instance was found runs the fatal hook with the
    /// runtime's error text.
    pub fn bootstrap(&mut self, role: Role) -> BridgeResult<()> {
        self.keep_alive(role);
        let result = self.instance_mut(role)?.bootstrap();
        self.keep_alive(role);

        if let Err(err) = result {
            let instance = self.instance_mut(role)?;
            let module = instance.config().bootstrap_module.clone();
            log::error!("{role} runtime failed to bootstrap '{module}': {err}");
            instance.bridge().fatal(&format!("bootstrap module '{module}' failed: {err}"));
        }
        log::info!("{role} runtime bootstrapped");
        Ok(())
    }

    /// Load a non-bootstrap module. Failures are logged and return `false`.
    pub fn load_module(&mut self, role: Role, name: &str) -> bool {
        self.keep_alive(role);
        let loaded = match self.get_mut(role) {
            Some(instance) => instance.load(name),
            None => {
                log::warn!("Cannot load module '{name}': no {role} runtime");
                false
            }
        };
        self.keep_alive(role);
        loaded
    }

    /// Re-execute changed modules of one instance.
    pub fn reload_changed(&mut self, role: Role) -> Vec<String> {
        self.keep_alive(role);
        let reloaded = self.get_mut(role).map(RuntimeInstance::reload_changed).unwrap_or_default();
        self.keep_alive(role);
        if !reloaded.is_empty() {
            log::info!("{role} runtime reloaded {}", reloaded.join(", "));
        }
        reloaded
    }

    /// Release the instance for `role`. Returns whether one existed.
    pub fn teardown(&mut self, role: Role) -> bool {
        match self.slot_mut(role).take() {
            Some(mut instance) => {
                instance.teardown();
                true
            }
            None => false,
        }
    }

    pub fn teardown_all(&mut self) {
        self.teardown(Role::Client);
        self.teardown(Role::Server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;

    fn panic_hook(message: &str) -> ! {
        panic!("fatal hook: {message}")
    }

    fn config(root: &Path) -> BridgeConfig {
        BridgeConfig { root_dir: root.to_path_buf(), strict_protocol: Some(false), ..BridgeConfig::default() }
    }

    fn write_init(root: &Path, source: &str) {
        let path = root.join("data/init.rhai");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }

    #[test]
    fn test_create_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = RuntimeManager::new();
        manager.create(Role::Client, config(root.path())).unwrap().external_set("marker", rhai::Dynamic::from(1_i64));

        let other = BridgeConfig { bootstrap_module: "other".to_string(), ..config(root.path()) };
        let again = manager.create(Role::Client, other).unwrap();
        assert_eq!(again.config().bootstrap_module, "init");
        assert!(again.external_get("marker").is_some());
        assert!(!manager.exists(Role::Server));
    }

    #[test]
    fn test_bootstrap_missing_instance_is_not_found() {
        let mut manager = RuntimeManager::new();
        let err = manager.bootstrap(Role::Server).unwrap_err();
        assert!(matches!(err, BridgeError::NotFound { kind: "runtime", .. }));
    }

    #[test]
    #[should_panic(expected = "bootstrap module 'init' failed")]
    fn test_bootstrap_failure_runs_fatal_hook() {
        let root = tempfile::tempdir().unwrap();
        write_init(root.path(), "let = ;");
        let mut manager = RuntimeManager::new();
        manager.set_fatal_hook(panic_hook);
        manager.create(Role::Client, config(root.path())).unwrap();
        let _ = manager.bootstrap(Role::Client);
    }

    #[test]
    fn test_keep_alive_wraps_bootstrap_and_loads() {
        let root = tempfile::tempdir().unwrap();
        write_init(root.path(), "");
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);

        let mut manager = RuntimeManager::new();
        manager.set_keep_alive(Some(Box::new(move |role| seen.borrow_mut().push(role))));
        manager.create(Role::Server, config(root.path())).unwrap();
        manager.bootstrap(Role::Server).unwrap();
        assert!(!manager.load_module(Role::Server, "absent"));

        assert_eq!(calls.borrow().len(), 4);
        assert!(calls.borrow().iter().all(|role| role.is_server()));
    }

    #[test]
    fn test_teardown_releases_instance() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = RuntimeManager::new();
        manager.create(Role::Client, config(root.path())).unwrap();
        assert!(manager.teardown(Role::Client));
        assert!(manager.get(Role::Client).is_none());
        assert!(!manager.teardown(Role::Client));
    }
}
