pub mod error;
pub mod config;

// Bridge components
pub mod pin_table;
pub mod external;
pub mod entity_link;
pub mod native_registry;
pub mod module_loader;

// Runtime
pub mod bridge;
pub mod builtins;
pub mod runtime;
pub mod manager;
pub mod script_log;
pub mod script_diagnostics;

pub mod cli;

pub use error::{BridgeError, BridgeResult};
pub use manager::RuntimeManager;
pub use runtime::{Role, RuntimeInstance};
