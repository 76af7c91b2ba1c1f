// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command-line client for ndb_cpcd.

// Panicking code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use ndb_cpcd::client::ListedProcess;
use ndb_cpcd::constants::DEFAULT_PORT;
use ndb_cpcd::{CpcClient, ProcessDefinition, ProcessId, ProcessType, ShutdownSignal};

/// Talk to an ndb_cpcd daemon
#[derive(Parser, Debug)]
#[command(name = "ndb_cpcc", version)]
struct Cli {
    /// Daemon host
    #[arg(long, env = "CPCD_HOST", default_value = "localhost", global = true)]
    host: String,

    /// Daemon port
    #[arg(short, long, env = "CPCD_PORT", default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List defined processes
    List,
    /// Define a process and print its id
    Define(DefineArgs),
    /// Start a process
    Start { id: u32 },
    /// Stop a process
    Stop { id: u32 },
    /// Remove a process definition
    Undefine { id: u32 },
    /// Show the daemon's protocol and version
    Version,
}

#[derive(Args, Debug)]
struct DefineArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    group: String,
    /// Executable to run
    #[arg(long)]
    path: String,
    #[arg(long, default_value = "")]
    args: String,
    #[arg(long, default_value = "")]
    cwd: String,
    /// Space separated NAME=VALUE pairs
    #[arg(long, default_value = "")]
    env: String,
    #[arg(long, default_value = "")]
    owner: String,
    #[arg(long, default_value = "")]
    runas: String,
    #[arg(long, default_value = "")]
    stdin: String,
    #[arg(long, default_value = "")]
    stdout: String,
    #[arg(long, default_value = "")]
    stderr: String,
    /// Space separated resource:value pairs, e.g. "c:unlimited n:1024"
    #[arg(long, default_value = "")]
    ulimit: String,
    /// permanent or temporary
    #[arg(long = "type", default_value = "permanent", value_parser = parse_type)]
    process_type: ProcessType,
    /// SIGTERM or SIGKILL
    #[arg(long, default_value = "SIGTERM", value_parser = parse_signal)]
    shutdown: ShutdownSignal,
}

impl From<DefineArgs> for ProcessDefinition {
    fn from(args: DefineArgs) -> Self {
        ProcessDefinition {
            id: None,
            name: args.name,
            group: args.group,
            path: args.path,
            args: args.args,
            cwd: args.cwd,
            env: args.env,
            owner: args.owner,
            runas: args.runas,
            stdin: args.stdin,
            stdout: args.stdout,
            stderr: args.stderr,
            ulimit: args.ulimit,
            process_type: args.process_type,
            shutdown: args.shutdown,
        }
    }
}

fn parse_type(s: &str) -> Result<ProcessType, String> {
    ProcessType::parse(s).ok_or_else(|| format!("expected permanent or temporary, got '{s}'"))
}

fn parse_signal(s: &str) -> Result<ShutdownSignal, String> {
    ShutdownSignal::parse(s).ok_or_else(|| format!("expected SIGTERM or SIGKILL, got '{s}'"))
}

fn process_id(id: u32) -> Result<ProcessId> {
    ProcessId::new(id).ok_or_else(|| anyhow!("invalid process id {id}"))
}

const COLUMNS: [&str; 6] = ["id", "name", "group", "status", "pid", "path"];

/// Render the list as left-aligned columns under a header row.
fn format_table(processes: &[ListedProcess]) -> String {
    let rows: Vec<Vec<&str>> = processes
        .iter()
        .map(|p| COLUMNS.iter().map(|c| p.get(c).unwrap_or("-")).collect())
        .collect();
    let mut widths = COLUMNS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header: Vec<&str> = COLUMNS.to_vec();
    for row in std::iter::once(&header).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let address = format!("{}:{}", cli.host, cli.port);
    let mut client = CpcClient::connect(address.as_str())
        .with_context(|| format!("Failed to connect to {address}"))?;

    match cli.command {
        Command::List => {
            let processes = client.list().context("list processes failed")?;
            print!("{}", format_table(&processes));
        }
        Command::Define(args) => {
            let id = client
                .define(&args.into())
                .context("define process failed")?;
            println!("{id}");
        }
        Command::Start { id } => client.start(process_id(id)?).context("start process failed")?,
        Command::Stop { id } => client.stop(process_id(id)?).context("stop process failed")?,
        Command::Undefine { id } => client
            .undefine(process_id(id)?)
            .context("undefine process failed")?,
        Command::Version => {
            let version = client.show_version().context("show version failed")?;
            println!("ndb_cpcd {} (protocol {})", version.version, version.protocol);
        }
    }
    Ok(())
}
