//! # Example: guard
//!
//! Starts a few child processes under a guardian and tears them all down on
//! Ctrl-C (or after a few seconds).
//!
//! Shows how to:
//! - Configure a [`Guardian`] with detailed logging and a custom subscriber.
//! - Start processes from [`SpawnSpec`]s and read [`Statistics`].
//! - Dispose explicitly, terminating everything still running.
//!
//! ## Flow
//! ```text
//! SpawnSpec ──► Guardian::start()
//!     ├─► Spawn::spawn() ──► Registry.insert()
//!     ├─► Engine::attach() ──► GroupAttached | ManualTrackingActivated
//!     └─► exit watcher ──► Exited
//!
//! Ctrl-C / timeout ──► Guardian::dispose()
//!     └─► kill_all() ──► SIGTERM ─(timeout)─► SIGKILL ──► CleanupCompleted
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example guard
//! ```

use std::{sync::Arc, time::Duration};

use procguard::{Event, EventKind, Guardian, GuardianConfig, SpawnSpec, Subscribe};
use tracing_subscriber::EnvFilter;

/// Prints exits and forced terminations.
struct ExitReporter;

#[async_trait::async_trait]
impl Subscribe for ExitReporter {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::Exited => println!(
                "[sub] exited:  pid={} program={} code={:?}",
                ev.pid.unwrap_or(0),
                ev.program.as_deref().unwrap_or("<unknown>"),
                ev.exit_code
            ),
            EventKind::ForcedTerminated => println!(
                "[sub] forced:  pid={} after {}ms",
                ev.pid.unwrap_or(0),
                ev.timeout_ms.unwrap_or(0)
            ),
            EventKind::CleanupCompleted => println!(
                "[sub] cleanup: succeeded={} failed={}",
                ev.succeeded.unwrap_or(0),
                ev.failed.unwrap_or(0)
            ),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "exit-reporter"
    }
}

fn workload() -> Vec<SpawnSpec> {
    #[cfg(unix)]
    {
        vec![
            SpawnSpec::new("sleep").arg("300"),
            SpawnSpec::new("sh").args(["-c", "sleep 300 & sleep 300 & wait"]),
            SpawnSpec::new("sh").args(["-c", "trap '' TERM; sleep 300"]),
            SpawnSpec::new("sh").args(["-c", "exit 3"]),
        ]
    }
    #[cfg(windows)]
    {
        vec![
            SpawnSpec::new("cmd").args(["/C", "ping -n 300 127.0.0.1 > NUL"]),
            SpawnSpec::new("cmd").args(["/C", "exit 3"]),
        ]
    }
    #[cfg(not(any(unix, windows)))]
    {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = GuardianConfig {
        max_managed_processes: 8,
        process_kill_timeout: Duration::from_secs(2),
        forced_exit_grace: Duration::from_secs(2),
        cleanup_interval: Duration::from_secs(1),
        detailed_logging: true,
        ..GuardianConfig::default()
    };

    let guardian = Guardian::builder(cfg)
        .with_subscribers(vec![Arc::new(ExitReporter)])
        .build()?;
    println!("engine: {}", guardian.active_engine());

    for spec in workload() {
        let p = guardian.start(spec).await?;
        p.set_metadata("demo", "guard");
        println!("started pid={} program={} as {:?}", p.pid(), p.program(), p.attachment());
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let stats = guardian.statistics()?;
    println!(
        "stats: total={} running={} exited={} memory={}KiB avg_runtime={:?}",
        stats.total,
        stats.running,
        stats.exited,
        stats.memory_bytes / 1024,
        stats.average_runtime
    );

    println!("press Ctrl-C to dispose (or wait 5s)");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("ctrl-c received"),
        _ = tokio::time::sleep(Duration::from_secs(5)) => println!("timeout reached"),
    }

    guardian.dispose().await;
    println!("disposed; {} processes left under supervision", guardian.len());
    Ok(())
}
