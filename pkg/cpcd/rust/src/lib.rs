// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process control daemon for NDB cluster hosts.
//!
//! Clients define processes over a line-based TCP protocol and ask for them
//! to be started or stopped. A supervisor thread keeps declared and actual
//! state in line, and the process list survives daemon restarts.

// Correctness
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod argv;
pub mod cli;
pub mod client;
pub mod constants;
pub mod error;
pub mod events;
pub mod executor;
pub mod limits;
pub mod pidfile;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod supervisor;

pub use client::{ClientError, CpcClient};
pub use error::{ErrorCode, ParseError, RequestError, RequestStatus, SpawnError, StoreError};
pub use events::{Event, EventBus, EventKind, EventListener, LogListener};
pub use executor::{ForkExecutor, ProcessExecutor, SpawnedProcess};
pub use process::{
    Process, ProcessDefinition, ProcessId, ProcessStatus, ProcessType, ShutdownSignal,
};
pub use registry::{Mode, Registry};
pub use server::ControlServer;
pub use store::ProcessStore;
pub use supervisor::Supervisor;
