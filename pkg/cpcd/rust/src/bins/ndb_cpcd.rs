// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cpcd_log::LogConfig;
use log::{LevelFilter, debug, info};
use nix::sys::signal::{SigHandler, Signal};
use nix::unistd::{Gid, Uid};
use tokio::signal::unix::{SignalKind, signal};

use ndb_cpcd::cli::DaemonArgs;
use ndb_cpcd::constants::DEFAULT_PROCESS_FILE;
use ndb_cpcd::{ControlServer, ForkExecutor, LogListener, ProcessStore, Registry, Supervisor};

fn prepare_work_dir(args: &DaemonArgs) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&args.work_dir)
        .with_context(|| format!("Failed to create work dir {}", args.work_dir.display()))?;
    std::env::set_current_dir(&args.work_dir)
        .with_context(|| format!("Failed to enter work dir {}", args.work_dir.display()))
}

fn init_logging(args: &DaemonArgs) -> Result<()> {
    let file = args.logfile_path();
    let config = LogConfig {
        level: if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        console: args.debug || (file.is_none() && !args.syslog),
        file,
        syslog: args.syslog,
    }
    .with_env_override();
    cpcd_log::init(config).context("Failed to initialize logging")
}

fn switch_user(name: &str) -> Result<()> {
    let user = uzers::get_user_by_name(name).with_context(|| format!("Unknown user {name}"))?;
    nix::unistd::setgid(Gid::from_raw(user.primary_group_id()))
        .with_context(|| format!("Failed to switch group for user {name}"))?;
    nix::unistd::setuid(Uid::from_raw(user.uid()))
        .with_context(|| format!("Failed to switch to user {name}"))?;
    info!("Running as user {name}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = DaemonArgs::parse();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    args.anchor_work_dir(&cwd);
    prepare_work_dir(&args)?;
    init_logging(&args)?;
    if let Some(config) = &args.config {
        debug!("Ignoring --config {}", config.display());
    }

    // SAFETY: SIG_IGN installs no handler code, so no async-signal-safety
    // requirements apply.
    unsafe { nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("Failed to ignore SIGPIPE")?;

    if let Some(user) = &args.user {
        switch_user(user)?;
    }

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let registry = Arc::new(Registry::new(
        Arc::new(ForkExecutor::new()),
        Some(ProcessStore::new(DEFAULT_PROCESS_FILE)),
    ));
    registry.events().register(Arc::new(LogListener));

    let server = ControlServer::bind(args.listen_address(), registry.clone())
        .await
        .with_context(|| format!("Failed to listen on {}", args.listen_address()))?;

    let restoring = registry.clone();
    tokio::task::spawn_blocking(move || restoring.restore())
        .await
        .context("Process list restore panicked")?
        .context("Failed to restore process list")?;

    let supervisor = Supervisor::spawn(registry.clone(), args.poll_interval())
        .context("Failed to start supervisor")?;
    info!(
        "ndb_cpcd {} started in {}",
        env!("CARGO_PKG_VERSION"),
        args.work_dir.display()
    );

    server
        .run(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            }
        })
        .await;

    tokio::task::spawn_blocking(move || supervisor.shutdown())
        .await
        .context("Supervisor shutdown panicked")?;
    info!("ndb_cpcd stopped");
    Ok(())
}
