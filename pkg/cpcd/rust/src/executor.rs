// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Launching, probing and signalling supervised process groups.
//!
//! Permanent processes are launched through an intermediate that forks again
//! and exits, so the daemon never becomes their parent. Temporary processes
//! are forked once and their `Child` handle is returned for reaping.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Instant;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::argv::{build_argv, parse_env};
use crate::constants::{PIDFILE_WAIT, POLL_STEP, STDERR_TO_STDOUT};
use crate::error::SpawnError;
use crate::limits::{ResourceLimit, parse_limits};
use crate::pidfile::{self, PidFileWriter};
use crate::process::{Process, ProcessType, ShutdownSignal};

/// Result of a successful launch.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Process-group id of the new session.
    pub pgid: u32,
    /// Handle of a direct child still owed a `wait`; only set for temporaries.
    pub child: Option<Child>,
}

/// OS seam of the supervisor.
pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, process: &Process) -> Result<SpawnedProcess, SpawnError>;

    /// Whether anything in the group can still be signalled.
    fn is_alive(&self, pgid: u32) -> bool;

    fn signal(&self, pgid: u32, signal: ShutdownSignal) -> io::Result<()>;
}

/// The real executor, built on `fork`/`exec` via `std::process::Command`.
#[derive(Debug, Default)]
pub struct ForkExecutor;

impl ForkExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessExecutor for ForkExecutor {
    fn spawn(&self, process: &Process) -> Result<SpawnedProcess, SpawnError> {
        let plan = LaunchPlan::prepare(process)?;
        let pidfile_path = plan.pidfile_path.clone();
        // A stale file would be mistaken for the new child's.
        pidfile::remove(&pidfile_path)?;

        match process.process_type() {
            ProcessType::Permanent => {
                let mut intermediate = plan.into_command(true)?.spawn()?;
                let status = intermediate.wait()?;
                if !status.success() {
                    return Err(SpawnError::Intermediate(status));
                }
                let pgid = wait_for_pidfile(&pidfile_path)?;
                debug!("process {} detached as group {pgid}", process.id());
                Ok(SpawnedProcess { pgid, child: None })
            }
            ProcessType::Temporary => {
                let child = plan.into_command(false)?.spawn()?;
                // The child is a session leader, so its pid is its pgid.
                let pgid = child.id();
                debug!("temporary process {} started as group {pgid}", process.id());
                Ok(SpawnedProcess {
                    pgid,
                    child: Some(child),
                })
            }
        }
    }

    fn is_alive(&self, pgid: u32) -> bool {
        let Some(group) = group_pid(pgid) else {
            return false;
        };
        match killpg(group, None) {
            Ok(()) => !leader_is_zombie(pgid),
            Err(Errno::ESRCH) => false,
            Err(Errno::EPERM) => {
                warn!("not permitted to signal process group {pgid}, treating it as dead");
                false
            }
            Err(e) => {
                warn!("failed to probe process group {pgid}: {e}");
                false
            }
        }
    }

    fn signal(&self, pgid: u32, signal: ShutdownSignal) -> io::Result<()> {
        let group = group_pid(pgid).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let signal = match signal {
            ShutdownSignal::Term => Signal::SIGTERM,
            ShutdownSignal::Kill => Signal::SIGKILL,
        };
        match killpg(group, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

/// Group 0 and 1 would address the caller's own group or init.
fn group_pid(pgid: u32) -> Option<Pid> {
    i32::try_from(pgid).ok().filter(|&g| g > 1).map(Pid::from_raw)
}

/// A group leader that exited but was never reaped still answers the zero
/// signal. Only detectable through procfs.
#[cfg(target_os = "linux")]
fn leader_is_zombie(pgid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pgid}/stat")) else {
        return false;
    };
    // The command name may itself contain parentheses.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(not(target_os = "linux"))]
fn leader_is_zombie(_pgid: u32) -> bool {
    false
}

fn wait_for_pidfile(path: &Path) -> Result<u32, SpawnError> {
    let deadline = Instant::now() + PIDFILE_WAIT;
    loop {
        if let Some(pgid) = pidfile::read(path)? {
            return Ok(pgid);
        }
        if Instant::now() >= deadline {
            return Err(SpawnError::PidFileTimeout(path.to_path_buf()));
        }
        thread::sleep(POLL_STEP);
    }
}

/// Everything the child needs, resolved in the parent.
struct LaunchPlan {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    account: Option<(libc::uid_t, libc::gid_t)>,
    limits: Vec<ResourceLimit>,
    pidfile_path: PathBuf,
}

impl LaunchPlan {
    fn prepare(process: &Process) -> Result<Self, SpawnError> {
        let def = process.definition();
        if def.path.is_empty() {
            return Err(SpawnError::MissingPath);
        }
        let limits = parse_limits(&def.ulimit)?;
        let account = if def.runas.is_empty() {
            None
        } else {
            let user = uzers::get_user_by_name(&def.runas)
                .ok_or_else(|| SpawnError::UnknownUser(def.runas.clone()))?;
            Some((user.uid(), user.primary_group_id()))
        };

        let stdin = match def.stdin.as_str() {
            "" => Stdio::null(),
            path => Stdio::from(open_redirect("stdin", path, false)?),
        };
        let stdout_file = match def.stdout.as_str() {
            "" => None,
            path => Some(open_redirect("stdout", path, true)?),
        };
        let stderr = match def.stderr.as_str() {
            "" => Stdio::null(),
            STDERR_TO_STDOUT => match &stdout_file {
                Some(file) => Stdio::from(file.try_clone()?),
                None => Stdio::null(),
            },
            path => Stdio::from(open_redirect("stderr", path, true)?),
        };
        let stdout = stdout_file.map_or_else(Stdio::null, Stdio::from);

        let cwd = (!def.cwd.is_empty()).then(|| PathBuf::from(&def.cwd));
        // The child has already changed directory when it writes the pid
        // file, so the path must not depend on the daemon's cwd.
        let pidfile_path = std::env::current_dir()?.join(process.pidfile_path());

        Ok(Self {
            argv: build_argv(&def.path, &def.args),
            cwd,
            env: parse_env(&def.env),
            stdin,
            stdout,
            stderr,
            account,
            limits,
            pidfile_path,
        })
    }

    fn into_command(self, detach: bool) -> Result<Command, SpawnError> {
        let writer = PidFileWriter::new(&self.pidfile_path)?;
        let (program, args) = self.argv.split_first().ok_or(SpawnError::MissingPath)?;

        let mut cmd = Command::new(program);
        cmd.arg0(program)
            .args(args)
            .envs(self.env)
            .stdin(self.stdin)
            .stdout(self.stdout)
            .stderr(self.stderr);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let account = self.account;
        let limits = self.limits;
        // SAFETY: the closure only issues async-signal-safe syscalls and
        // touches memory prepared before the fork.
        unsafe {
            cmd.pre_exec(move || {
                if detach {
                    libc::signal(libc::SIGCHLD, libc::SIG_IGN);
                    match libc::fork() {
                        -1 => return Err(io::Error::last_os_error()),
                        0 => {}
                        _ => libc::_exit(0),
                    }
                }

                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                writer.write_own_pgid()?;

                if let Some((uid, gid)) = account {
                    // Group before user, while still privileged.
                    if libc::setgid(gid) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::setuid(uid) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if detach {
                    libc::signal(libc::SIGCHLD, libc::SIG_DFL);
                }
                for limit in &limits {
                    limit.apply()?;
                }
                mark_inherited_fds_cloexec();
                Ok(())
            });
        }
        Ok(cmd)
    }
}

fn open_redirect(stream: &'static str, path: &str, output: bool) -> Result<File, SpawnError> {
    let mut options = OpenOptions::new();
    if output {
        options.append(true).create(true).mode(0o600);
    } else {
        options.read(true);
    }
    options.open(path).map_err(|source| SpawnError::Redirect {
        stream,
        path: PathBuf::from(path),
        source,
    })
}

/// Upper bound on the descriptors scanned before exec.
const MAX_SCANNED_FD: libc::c_int = 65536;

/// Every descriptor from 3 upward is closed on exec. Setting the flag instead
/// of closing keeps the exec-failure pipe of `Command` working.
fn mark_inherited_fds_cloexec() {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    let max_fd = if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0 {
        libc::c_int::try_from(limit.rlim_cur).unwrap_or(MAX_SCANNED_FD)
    } else {
        MAX_SCANNED_FD
    };
    for fd in 3..max_fd.min(MAX_SCANNED_FD) {
        // SAFETY: fcntl on a closed descriptor fails with EBADF and is harmless.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }
}
