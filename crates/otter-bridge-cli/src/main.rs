mod config;
mod modules;
mod script;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use otter_bridge::prelude::*;
use otter_bridge::set_soft_exception_logger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::filter::EnvFilter;

use crate::config::load_config;
use crate::modules::demo_modules;
use crate::script::Bundle;

/// Quiet period after an idle transition before the run is considered finished
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "otter-bridge", version, about = "Otter native bridge demo host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a bundle, start the app and wait for the bridge to go idle
    Run {
        bundle: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Print the module configuration sent to runtime instances
    Config {
        /// Only list modules available to web workers
        #[arg(long)]
        worker: bool,
    },
}

script_module! {
    /// Script-side entry point for starting an application
    struct AppRegistry as "AppRegistry" {
        fn run_application as "runApplication"(app_key: String, params: WritableMap);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Busy,
    Idle,
}

struct ChannelListener {
    events: Sender<Activity>,
}

impl BridgeIdleListener for ChannelListener {
    fn on_transition_to_bridge_idle(&self) {
        let _ = self.events.send(Activity::Idle);
    }

    fn on_transition_to_bridge_busy(&self) {
        let _ = self.events.send(Activity::Busy);
    }
}

fn main() -> Result<()> {
    set_soft_exception_logger(|e| eprintln!("[{}] {}", e.category, e.message));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bundle,
            config,
            timeout_ms,
        } => run_bundle(bundle, config, timeout_ms)?,
        Commands::Config { worker } => print_module_config(worker)?,
    }

    Ok(())
}

fn run_bundle(path: PathBuf, config: Option<PathBuf>, timeout_ms: u64) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let source = std::fs::read_to_string(&path)?;
    let bundle = Bundle::parse(&source)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    if bundle.is_empty() {
        warn!(bundle = %path.display(), "Bundle has no statements");
    }

    let (events, activity) = crossbeam_channel::unbounded();
    let bridge = Bridge::builder()
        .config(config.bridge)
        .modules(demo_modules()?)
        .executor(bundle.into_executor())
        .idle_listener(Arc::new(ChannelListener { events }))
        .build()?;

    let result = drive(&bridge, &source, &path, &config.app, &activity, timeout_ms);
    bridge.destroy();

    let stats = bridge.stats();
    eprintln!(
        "script calls: {}, native calls: {}, failures: {}, dropped: {}",
        stats.script_calls, stats.native_calls, stats.native_failures, stats.dropped_calls
    );
    result
}

fn drive(
    bridge: &Bridge,
    source: &str,
    path: &std::path::Path,
    app: &config::AppConfig,
    activity: &Receiver<Activity>,
    timeout_ms: u64,
) -> Result<()> {
    bridge.run_script(source, path.display().to_string())?;
    bridge.initialize()?;
    bridge
        .script_module::<AppRegistry>()
        .run_application(app.key.clone(), map! { "rootTag" => app.root_tag });

    wait_until_idle(bridge, activity, Duration::from_millis(timeout_ms))
}

/// Block until the bridge goes idle and stays idle for [`SETTLE`].
fn wait_until_idle(bridge: &Bridge, activity: &Receiver<Activity>, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut idle = false;

    loop {
        if bridge.is_destroyed() {
            return Err(anyhow::anyhow!("bridge was torn down by a native exception"));
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(anyhow::anyhow!(
                "bridge still busy after {}ms ({} pending calls)",
                timeout.as_millis(),
                bridge.pending_calls()
            ));
        }

        let wait = if idle { SETTLE.min(deadline - now) } else { deadline - now };
        match activity.recv_timeout(wait) {
            Ok(Activity::Busy) => idle = false,
            Ok(Activity::Idle) => idle = true,
            Err(RecvTimeoutError::Timeout) if idle => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn print_module_config(worker: bool) -> Result<()> {
    let registry = demo_modules()?.build();
    let config = registry.module_config(worker)?;
    println!("{}", serde_json::to_string_pretty(&config.to_json()?)?);
    Ok(())
}
