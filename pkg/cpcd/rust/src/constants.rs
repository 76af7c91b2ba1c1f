// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Daemon-wide defaults and limits.

use std::time::Duration;

/// Default TCP port of the control channel.
pub const DEFAULT_PORT: u16 = 1234;

/// Default working directory; created if missing.
pub const DEFAULT_WORK_DIR: &str = "/var/run/ndb_cpcd";

/// Process list file, relative to the working directory.
pub const DEFAULT_PROCESS_FILE: &str = "ndb_cpcd.conf";

/// Default supervisor polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Process ids live in `1..=MAX_PROCESS_ID` (13 bits).
pub const MAX_PROCESS_ID: u32 = 8191;

/// Upper bound on a reply's error message, in bytes.
pub const MAX_STATUS_MESSAGE_LEN: usize = 255;

/// How long a stopped group gets to exit before it is sent SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// How long the spawner waits for a child's pid file to appear.
pub const PIDFILE_WAIT: Duration = Duration::from_secs(5);

/// Poll step used while waiting on pid files and exiting groups.
pub const POLL_STEP: Duration = Duration::from_millis(50);

/// Protocol revision reported by `show version`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Literal `stderr` value meaning "same file as stdout".
pub const STDERR_TO_STDOUT: &str = "2>&1";

