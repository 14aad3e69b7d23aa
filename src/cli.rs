use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{BridgeConfig, ConfigOverrides};
use crate::manager::RuntimeManager;
use crate::module_loader::ModuleLoader;
use crate::runtime::Role;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Runtime role (client or server)
    #[arg(long, default_value = "client")]
    role: Role,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-user home directory searched before the installation root
    #[arg(long)]
    home: Option<PathBuf>,

    /// Installation root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// Abort on protocol violations instead of reporting them
    #[arg(long)]
    strict: Option<bool>,
}

impl ConfigArgs {
    fn load(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        let overrides =
            ConfigOverrides { home_dir: self.home.clone(), root_dir: self.root.clone(), strict_protocol: self.strict };
        if !overrides.is_empty() {
            log::debug!("Applying CLI overrides: {}", overrides.applied_fields().join(", "));
            config.apply_overrides(&overrides);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a runtime and drive its tick function
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of ticks to run
        #[arg(long, default_value_t = 60)]
        ticks: u32,

        /// Seconds per tick
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f32,
    },
    /// Print the file a module name resolves to
    Resolve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Module name (dot-separated)
        module: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, ticks, dt } => run_ticks(config, ticks, dt),
        Commands::Resolve { config, module } => resolve_module(config, &module),
    }
}

fn run_ticks(args: ConfigArgs, ticks: u32, dt: f32) -> Result<()> {
    let config = args.load()?;
    let role = args.role;

    let mut manager = RuntimeManager::new();
    manager.create(role, config).context("Failed to create runtime")?;
    manager.bootstrap(role)?;

    let instance = manager.get_mut(role).context("Runtime disappeared after bootstrap")?;
    println!("Running {} ticks on the {} runtime (dt = {:.4}s)", ticks, role, dt);

    let mut failures = 0;
    for i in 0..ticks {
        if let Err(e) = instance.tick(dt) {
            failures += 1;
            log::warn!("tick {} failed: {}", i, e);
        }
    }

    for diag in instance.take_diagnostics() {
        println!("{}", serde_json::to_string(&diag)?);
    }
    println!("Done: {} ticks, {} failed.", ticks, failures);

    manager.teardown_all();
    Ok(())
}

fn resolve_module(args: ConfigArgs, module: &str) -> Result<()> {
    let config = args.load()?;
    let loader = ModuleLoader::new(&config)?;

    match loader.resolve(module) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => {
            for candidate in loader.search_path().candidates(module) {
                log::debug!("  tried {}", candidate.display());
            }
            anyhow::bail!("module '{}' not found for the {} runtime", module, args.role)
        }
    }
}
