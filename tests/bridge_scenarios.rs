//! End-to-end scenarios against real module trees on disk.
//!
//! Run with: cargo test --test bridge_scenarios

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;

use rhai::{Dynamic, FnPtr};
use scripting_bridge::config::BridgeConfig;
use scripting_bridge::native_registry::{EntryCall, EntryError, EntryResult};
use scripting_bridge::{BridgeError, Role, RuntimeInstance, RuntimeManager};

fn panic_hook(message: &str) -> ! {
    panic!("fatal hook: {message}")
}

fn write_module(base: &Path, relative: &str, source: &str) {
    let path = base.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, source).unwrap();
}

fn config(root: &Path) -> BridgeConfig {
    BridgeConfig { root_dir: root.to_path_buf(), strict_protocol: Some(false), ..BridgeConfig::default() }
}

fn booted(root: &Path, role: Role) -> RuntimeInstance {
    let mut rt = RuntimeInstance::new(role, config(root)).unwrap();
    rt.set_fatal_hook(panic_hook);
    rt.bootstrap().unwrap();
    rt
}

fn noop(_: &mut EntryCall<'_, '_>) -> EntryResult {
    Ok(Dynamic::UNIT)
}

#[test]
fn registration_is_closed_after_seal() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");

    let mut rt = RuntimeInstance::new(Role::Server, config(root.path())).unwrap();
    rt.register("spawn_entity", noop).unwrap();
    rt.register("remove_entity", noop).unwrap();
    assert!(matches!(rt.register("spawn_entity", noop), Err(BridgeError::DuplicateName(_))));

    rt.bootstrap().unwrap();
    let ns = rt.namespace().unwrap();
    assert!(ns.has("spawn_entity") && ns.has("remove_entity") && ns.has("external_get"));

    let err = rt.register("late_entry", noop).unwrap_err();
    assert!(matches!(err, BridgeError::AlreadySealed(ref n) if n == "late_entry"));
    assert!(!rt.namespace().unwrap().has("late_entry"));
}

#[test]
fn script_cannot_tamper_with_namespace() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", r#"fn read(key) { CAPI.external_get(key) }"#);
    write_module(root.path(), "data/reassign.rhai", "CAPI = 5;");
    write_module(root.path(), "data/shadow.rhai", "let CAPI = #{};");
    write_module(root.path(), "data/setter.rhai", "CAPI.external_get = 1;");
    write_module(root.path(), "data/redefine.rhai", r#"fn external_get(key) { "hijacked" }"#);
    write_module(root.path(), "data/reserved.rhai", "fn names() { [] }");

    let mut rt = booted(root.path(), Role::Client);
    let before = rt.namespace().unwrap().resolve("external_get").unwrap();
    rt.external_set("key", Dynamic::from("value"));

    for module in ["reassign", "shadow", "setter", "redefine", "reserved"] {
        assert!(!rt.load(module), "module '{module}' should have been rejected");
    }
    assert!(matches!(
        rt.try_load("redefine"),
        Err(BridgeError::ModuleRedefinesEntry { ref entry, .. }) if entry == "external_get"
    ));

    let after = rt.namespace().unwrap().resolve("external_get").unwrap();
    assert!(Rc::ptr_eq(&before, &after));
    let value = rt.call("read", vec![Dynamic::from("key")]).unwrap();
    assert_eq!(value.into_string().unwrap(), "value");
    assert!(!rt.has_function("names"));
}

#[test]
fn namespace_helpers_are_read_only_views() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "data/init.rhai",
        r#"
            fn describe() {
                [CAPI.has("external_set"), CAPI.has("nope"), CAPI.len(), CAPI.names().len(), `${CAPI}`]
            }
        "#,
    );
    let mut rt = booted(root.path(), Role::Client);
    let out = rt.call("describe", vec![]).unwrap().cast::<rhai::Array>();
    let len = rt.namespace().unwrap().len() as i64;
    assert!(out[0].as_bool().unwrap());
    assert!(!out[1].as_bool().unwrap());
    assert_eq!(out[2].as_int().unwrap(), len);
    assert_eq!(out[3].as_int().unwrap(), len);
    assert_eq!(out[4].clone().into_string().unwrap(), format!("native API: {len} entries"));
}

#[test]
fn pin_table_refcounts() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");
    let rt = booted(root.path(), Role::Server);

    let first = rt.pin("x");
    let second = rt.pin("x");
    assert!(first.ptr_eq(&second));
    assert_eq!(rt.unpin("x").unwrap(), 1);
    assert_eq!(rt.bridge().pin_count("x"), 1);
    assert_eq!(rt.unpin("x").unwrap(), 0);
    assert_eq!(rt.bridge().pinned_len(), 0);

    let err = rt.unpin("x").unwrap_err();
    assert!(matches!(err, BridgeError::UnpinUntracked(_)));
    assert!(err.is_protocol());
}

#[test]
fn external_broker_round() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");
    let rt = booted(root.path(), Role::Client);

    assert!(rt.external_set("k", Dynamic::from(1_i64)).is_none());
    let previous = rt.external_set("k", Dynamic::from(2_i64)).unwrap();
    assert_eq!(previous.as_int().unwrap(), 1);
    assert_eq!(rt.external_get("k").unwrap().as_int().unwrap(), 2);
    assert!(rt.external_unset("k"));
    assert!(rt.external_get("k").is_none());
    assert!(!rt.external_unset("missing"));
}

#[test]
fn entity_links_are_generation_checked() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "fn poke(peer, amount) { peer.hits += amount; peer.hits }");
    let mut rt = booted(root.path(), Role::Server);

    let mut peer_a = rhai::Map::new();
    peer_a.insert("hits".into(), Dynamic::from(0_i64));
    let first = rt.link(7, Dynamic::from(peer_a)).unwrap();

    let hits = rt.call_peer(7, "poke", vec![Dynamic::from(3_i64)]).unwrap().unwrap();
    assert_eq!(hits.as_int().unwrap(), 3);
    let stored = rt.lookup(7).unwrap().flatten().cast::<rhai::Map>();
    assert_eq!(stored["hits"].as_int().unwrap(), 3);

    assert!(matches!(rt.link(7, Dynamic::UNIT), Err(BridgeError::AlreadyLinked(7))));

    assert!(rt.unlink(7).is_some());
    assert!(rt.lookup(7).is_none());
    assert!(rt.call_peer(7, "poke", vec![Dynamic::from(1_i64)]).unwrap().is_none());

    let second = rt.link(7, Dynamic::from("peer C")).unwrap();
    assert_eq!(first.index(), second.index());
    assert!(rt.bridge().resolve_link(first).is_none());
    let (uid, peer) = rt.bridge().resolve_link(second).unwrap();
    assert_eq!(uid, 7);
    assert_eq!(peer.flatten().into_string().unwrap(), "peer C");
}

#[test]
fn home_module_overrides_installed_module() {
    let home = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");
    write_module(root.path(), "data/greeting.rhai", r#"CAPI.external_set("origin", "root");"#);
    write_module(home.path(), "data/greeting.rhai", r#"CAPI.external_set("origin", "home");"#);

    let config = BridgeConfig { home_dir: Some(home.path().to_path_buf()), ..config(root.path()) };
    let mut rt = RuntimeInstance::new(Role::Client, config).unwrap();
    rt.bootstrap().unwrap();

    let path = rt.try_load("greeting").unwrap();
    assert!(path.starts_with(home.path()));
    assert_eq!(rt.external_get("origin").unwrap().into_string().unwrap(), "home");
}

#[test]
fn nested_modules_and_libraries_resolve() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");
    write_module(root.path(), "data/library/core/ui/hud.rhai", "fn hud_ready() { true }");
    write_module(root.path(), "data/library/weapons/rifle.rhai", "fn rifle_damage() { 12 }");

    let mut rt = booted(root.path(), Role::Client);
    assert!(rt.load("ui.hud"));
    assert!(rt.call("hud_ready", vec![]).unwrap().as_bool().unwrap());

    assert!(!rt.load("rifle"));
    assert!(rt.bridge().resolve_library("weapons"));
    assert!(rt.load("rifle"));
    assert_eq!(rt.call("rifle_damage", vec![]).unwrap().as_int().unwrap(), 12);

    assert!(!rt.bridge().resolve_library("../secrets"));
    assert!(!rt.load("../etc/passwd"));
}

#[test]
fn changed_modules_reload() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "fn version() { 1 }");
    let mut rt = booted(root.path(), Role::Server);
    assert!(rt.reload_changed().is_empty());

    write_module(root.path(), "data/init.rhai", "fn version() { 2 }");
    assert_eq!(rt.reload_changed(), vec!["init".to_string()]);
    assert_eq!(rt.call("version", vec![]).unwrap().as_int().unwrap(), 2);
}

#[test]
fn malformed_bootstrap_is_fatal_with_runtime_error_text() {
    let root = tempfile::tempdir().unwrap();
    let broken = "let = ;";
    write_module(root.path(), "data/init.rhai", broken);
    let expected = rhai::Engine::new().compile(broken).unwrap_err().to_string();

    let mut manager = RuntimeManager::new();
    manager.set_fatal_hook(panic_hook);
    manager.create(Role::Server, config(root.path())).unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| manager.bootstrap(Role::Server)));
    let payload = outcome.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.contains("fatal hook"));
    assert!(message.contains(&expected), "{message} should contain {expected}");
}

#[test]
fn non_bootstrap_failure_is_recoverable() {
    let root = tempfile::tempdir().unwrap();
    write_module(root.path(), "data/init.rhai", "");
    write_module(root.path(), "data/broken.rhai", "fn oops( {");

    let mut manager = RuntimeManager::new();
    manager.set_fatal_hook(panic_hook);
    manager.create(Role::Client, config(root.path())).unwrap();
    manager.bootstrap(Role::Client).unwrap();

    assert!(!manager.load_module(Role::Client, "broken"));
    assert!(!manager.load_module(Role::Client, "missing"));
    let rt = manager.get_mut(Role::Client).unwrap();
    assert!(rt.last_error().is_some());
    assert!(rt.is_bootstrapped());
}

#[test]
fn client_and_server_are_isolated() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "data/init.rhai",
        r#"
            if CLIENT { CAPI.external_set("side", "client"); }
            if SERVER { CAPI.external_set("side", "server"); }
        "#,
    );

    let mut manager = RuntimeManager::new();
    manager.set_fatal_hook(panic_hook);
    for role in [Role::Client, Role::Server] {
        manager.create(role, config(root.path())).unwrap();
        manager.bootstrap(role).unwrap();
    }

    let client = manager.get(Role::Client).unwrap();
    let server = manager.get(Role::Server).unwrap();
    client.external_set("only_client", Dynamic::from(1_i64));
    client.pin("client_string");

    assert!(server.external_get("only_client").is_none());
    assert_eq!(server.bridge().pin_count("client_string"), 0);
    assert_eq!(client.external_get("side").unwrap().into_string().unwrap(), "client");
    assert_eq!(server.external_get("side").unwrap().into_string().unwrap(), "server");
    assert!(!client.namespace().unwrap().same_table(server.namespace().unwrap()));
}

#[test]
fn reentrant_calls_keep_state_consistent() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "data/init.rhai",
        r#"
            fn inner(label) {
                CAPI.external_set("seen", label);
                CAPI.with_pinned(label, |l| CAPI.external_get("seen") + "!")
            }
            fn outer() { CAPI.with_pinned("outer", |l| inner(l)) }
            fn runaway(n) { CAPI.with_pinned("r", |l| runaway(n + 1)) }
            fn helper() { 21 }
            fn twice() { CAPI.dispatch_to("helper") * 2 }
        "#,
    );

    let config = BridgeConfig { max_call_depth: 16, ..config(root.path()) };
    let mut rt = RuntimeInstance::new(Role::Client, config).unwrap();
    rt.set_fatal_hook(panic_hook);
    rt.register("with_pinned", |call: &mut EntryCall<'_, '_>| {
        let label = call.string(0)?;
        let callback = call
            .take(1)?
            .try_cast::<FnPtr>()
            .ok_or_else(|| EntryError::script("second argument must be a function"))?;
        let guard = call.bridge().pin_scoped(&label);
        call.call_ptr(&callback, vec![guard.to_dynamic()])
    })
    .unwrap();
    rt.register("dispatch_to", |call: &mut EntryCall<'_, '_>| {
        let fn_name = call.string(0)?;
        call.call_script(&fn_name, vec![])
    })
    .unwrap();
    rt.bootstrap().unwrap();

    assert_eq!(rt.call("twice", vec![]).unwrap().as_int().unwrap(), 42);
    let result = rt.call("outer", vec![]).unwrap();
    assert_eq!(result.into_string().unwrap(), "outer!");
    assert_eq!(rt.bridge().pinned_len(), 0);
    assert_eq!(rt.bridge().depth(), 0);

    assert!(rt.call("runaway", vec![Dynamic::from(0_i64)]).is_err());
    assert_eq!(rt.bridge().pinned_len(), 0);
    assert_eq!(rt.bridge().depth(), 0);
}

#[test]
fn tick_drives_script_and_resets_log_budget() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "data/init.rhai",
        r#"
            CAPI.external_set("elapsed", 0.0);
            fn tick(dt) {
                let logged = 0;
                for i in 0..5 { if CAPI.log_info(`tick ${i}`) { logged += 1; } }
                CAPI.external_set("logged", logged);
                CAPI.external_set("elapsed", CAPI.external_get("elapsed") + dt);
            }
        "#,
    );
    let config = BridgeConfig { max_logs_per_tick: 3, ..config(root.path()) };
    let mut rt = RuntimeInstance::new(Role::Client, config).unwrap();
    rt.bootstrap().unwrap();

    for _ in 0..4 {
        rt.tick(0.25).unwrap();
        assert_eq!(rt.external_get("logged").unwrap().as_int().unwrap(), 3);
    }
    let elapsed = rt.external_get("elapsed").unwrap().as_float().unwrap();
    assert!((elapsed - 1.0).abs() < 1e-6);
}
