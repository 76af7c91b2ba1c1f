// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Crash-safe persistence of the process list.
//!
//! The list is written to `<path>.new` and swapped in with hard links, keeping
//! the previous version as `<path>.old` during the swap. At any point either
//! `<path>` or `<path>.new` holds a complete list.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::StoreError;
use crate::process::Process;
use crate::protocol::serialize_process_list;

const HEADER: &str = "# Process list written by ndb_cpcd. Do not edit while it is running.\n\n";

#[derive(Debug, Clone)]
pub struct ProcessStore {
    path: PathBuf,
}

impl ProcessStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn new_path(&self) -> PathBuf {
        self.sibling(".new")
    }

    pub fn old_path(&self) -> PathBuf {
        self.sibling(".old")
    }

    pub fn save(&self, processes: &[Process]) -> Result<(), StoreError> {
        let new = self.new_path();
        let old = self.old_path();
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StoreError::Write { path, source }
        };

        let mut file = File::create(&new).map_err(write_err(&new))?;
        file.write_all(HEADER.as_bytes())
            .and_then(|()| file.write_all(serialize_process_list(processes).as_bytes()))
            .and_then(|()| file.sync_all())
            .map_err(write_err(&new))?;
        drop(file);

        remove_if_exists(&old).map_err(write_err(&old))?;
        if let Err(e) = fs::hard_link(&self.path, &old) {
            if e.kind() == ErrorKind::NotFound {
                debug!("no previous process list at {}", self.path.display());
            } else {
                warn!(
                    "failed to link {} to {}: {e}",
                    self.path.display(),
                    old.display()
                );
            }
        }
        remove_if_exists(&self.path).map_err(write_err(&self.path))?;
        fs::hard_link(&new, &self.path).map_err(|source| StoreError::Fatal {
            path: self.path.clone(),
            source,
        })?;
        remove_if_exists(&new).map_err(write_err(&new))?;
        remove_if_exists(&old).map_err(write_err(&old))?;
        Ok(())
    }

    /// Open the most recent complete list: `<path>`, else `<path>.new`.
    /// Empty files count as absent.
    pub fn open(&self) -> Result<Option<(PathBuf, BufReader<File>)>, StoreError> {
        for path in [self.path.clone(), self.new_path()] {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(StoreError::Read { path, source }),
            };
            let len = file
                .metadata()
                .map_err(|source| StoreError::Read {
                    path: path.clone(),
                    source,
                })?
                .len();
            if len == 0 {
                warn!("ignoring empty process list {}", path.display());
                continue;
            }
            return Ok(Some((path, BufReader::new(file))));
        }
        Ok(None)
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
