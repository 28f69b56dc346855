// src/main.rs

use plexmon::{cli, config, daemon, logging};

fn main() {
    if let Err(err) = run_main() {
        eprintln!("plexmon error: {err:?}");
        std::process::exit(1);
    }
}

fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    let config_path = args.config.clone();

    let mut config = config::load_from_path(&config_path);
    config.apply_cli(&args);

    // Fork before anything spawns a thread (logging appender, runtime).
    if config.daemonize {
        daemon::daemonize()?;
    }

    let _log_guard = logging::init(&config)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting plexmon");

    // The core is single-threaded by design: one thread owns the watch set,
    // cache and scheduler, so a current-thread runtime is all it needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(plexmon::run(config, config_path))
}
