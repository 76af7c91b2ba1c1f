// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::constants::{DEFAULT_POLL_INTERVAL, DEFAULT_PORT, DEFAULT_WORK_DIR};

/// NDB cluster process control daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "ndb_cpcd", version)]
#[command(about = "Define, start, monitor and stop processes on this host")]
pub struct DaemonArgs {
    /// Working directory; created if missing
    #[arg(short = 'w', long, env = "CPCD_WORK_DIR", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// TCP port of the control channel
    #[arg(short, long, env = "CPCD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, env = "CPCD_BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    /// Log to the host syslog
    #[arg(short = 'S', long, env = "CPCD_SYSLOG")]
    pub syslog: bool,

    /// Log file; relative paths are resolved against the working directory
    #[arg(short = 'L', long, env = "CPCD_LOGFILE")]
    pub logfile: Option<PathBuf>,

    /// Log to the console at debug level
    #[arg(short, long, env = "CPCD_DEBUG")]
    pub debug: bool,

    /// Accepted for compatibility and ignored
    #[arg(short, long, env = "CPCD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run as this local account
    #[arg(short, long, env = "CPCD_USER")]
    pub user: Option<String>,

    /// Seconds between supervisor checks
    #[arg(long, env = "CPCD_POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,
}

impl DaemonArgs {
    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Make a relative working directory absolute against `cwd`, so later
    /// paths derived from it survive the daemon changing into it.
    pub fn anchor_work_dir(&mut self, cwd: &Path) {
        self.work_dir = resolve_against(cwd, &self.work_dir);
    }

    /// The log file, anchored at the working directory when relative.
    pub fn logfile_path(&self) -> Option<PathBuf> {
        self.logfile
            .as_deref()
            .map(|path| resolve_against(&self.work_dir, path))
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = DaemonArgs::try_parse_from(["ndb_cpcd"]).unwrap();
        assert_eq!(args.work_dir, PathBuf::from("/var/run/ndb_cpcd"));
        assert_eq!(args.listen_address().to_string(), "0.0.0.0:1234");
        assert_eq!(args.poll_interval(), Duration::from_secs(5));
        assert!(!args.debug && !args.syslog);
        assert!(args.logfile_path().is_none());
    }

    #[test]
    fn test_logfile_resolution() {
        let args = DaemonArgs::try_parse_from([
            "ndb_cpcd",
            "--work-dir=/srv/cpcd",
            "--logfile=cpcd.log",
        ])
        .unwrap();
        assert_eq!(
            args.logfile_path(),
            Some(PathBuf::from("/srv/cpcd/cpcd.log"))
        );

        let args = DaemonArgs::try_parse_from(["ndb_cpcd", "--logfile", "/var/log/cpcd.log"])
            .unwrap();
        assert_eq!(
            args.logfile_path(),
            Some(PathBuf::from("/var/log/cpcd.log"))
        );
    }

    #[test]
    fn test_relative_work_dir_is_anchored_once() {
        let mut args =
            DaemonArgs::try_parse_from(["ndb_cpcd", "--work-dir=rel", "--logfile=cpcd.log"])
                .unwrap();
        args.anchor_work_dir(Path::new("/home/ndb"));
        assert_eq!(args.work_dir, PathBuf::from("/home/ndb/rel"));
        assert_eq!(
            args.logfile_path(),
            Some(PathBuf::from("/home/ndb/rel/cpcd.log"))
        );

        args.anchor_work_dir(Path::new("/elsewhere"));
        assert_eq!(args.work_dir, PathBuf::from("/home/ndb/rel"));
    }

    #[test]
    fn test_flags() {
        let args = DaemonArgs::try_parse_from([
            "ndb_cpcd",
            "--port=4321",
            "--bind-address=127.0.0.1",
            "--debug",
            "--config=/etc/cpcd.ini",
            "--user=mysql",
            "--poll-interval=2",
        ])
        .unwrap();
        assert_eq!(args.listen_address().to_string(), "127.0.0.1:4321");
        assert!(args.debug);
        assert_eq!(args.user.as_deref(), Some("mysql"));
        assert_eq!(args.poll_interval(), Duration::from_secs(2));
        assert!(DaemonArgs::try_parse_from(["ndb_cpcd", "--poll-interval=0"]).is_err());
    }
}
