use anyhow::Result;
use atorch_dist::LaunchEnv;
use atorch_trainer::cli::{Cli, Commands};
use atorch_trainer::commands;
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// Console on stderr plus one daily log file per local rank, so ranks
/// launched on the same node don't interleave lines.
fn init_logging(log_dir: &Path) -> WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_name = match LaunchEnv::from_env().local_rank {
        rank if rank >= 0 => format!("atorch_trainer.rank{rank}.log"),
        _ => "atorch_trainer.log".to_string(),
    };
    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, file_name));

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    guard
}

/// Panics land in the log file too; stderr may belong to a launcher.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic");
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        tracing::error!(target: "panic", "🔥 atorch_trainer panicked at {}: {}", location, msg);
        eprintln!("🔥 atorch_trainer panicked at {}: {}", location, msg);
    }));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_dir);
    install_panic_hook();

    match cli.command {
        Commands::Validate(args) => commands::validate(args),
        Commands::Dump(args) => commands::dump(args),
        Commands::SetupDevices(args) => commands::setup_devices(args),
    }
}
