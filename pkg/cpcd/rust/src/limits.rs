// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! `ulimit` field: `K:V` pairs applied as soft rlimits in the child.

use std::io;

use crate::error::SpawnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Core,
    Data,
    FileSize,
    NoFile,
    Stack,
    Cpu,
}

impl Resource {
    fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "c" => Some(Resource::Core),
            "d" => Some(Resource::Data),
            "f" => Some(Resource::FileSize),
            "n" => Some(Resource::NoFile),
            "s" => Some(Resource::Stack),
            "t" => Some(Resource::Cpu),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitValue {
    Unlimited,
    Value(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimit {
    pub resource: Resource,
    pub value: LimitValue,
}

impl ResourceLimit {
    /// Set the soft limit, keeping the hard limit. Runs between fork and
    /// exec, so it must not allocate.
    pub fn apply(&self) -> io::Result<()> {
        let resource = match self.resource {
            Resource::Core => libc::RLIMIT_CORE,
            Resource::Data => libc::RLIMIT_DATA,
            Resource::FileSize => libc::RLIMIT_FSIZE,
            Resource::NoFile => libc::RLIMIT_NOFILE,
            Resource::Stack => libc::RLIMIT_STACK,
            Resource::Cpu => libc::RLIMIT_CPU,
        };
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `limit` is a valid, writable rlimit.
        if unsafe { libc::getrlimit(resource, &mut limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
        limit.rlim_cur = match self.value {
            LimitValue::Unlimited => libc::RLIM_INFINITY,
            LimitValue::Value(v) => v as libc::rlim_t,
        };
        // SAFETY: `limit` is a valid rlimit.
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Parse a whitespace-separated `K:V` list, e.g. `c:unlimited n:4096`.
pub fn parse_limits(spec: &str) -> Result<Vec<ResourceLimit>, SpawnError> {
    spec.split_whitespace()
        .map(|pair| {
            let invalid = || SpawnError::InvalidLimit(pair.to_string());
            let (letter, value) = pair.split_once(':').ok_or_else(invalid)?;
            let resource = Resource::from_letter(letter).ok_or_else(invalid)?;
            let value = match value {
                "unlimited" => LimitValue::Unlimited,
                v => LimitValue::Value(v.parse().map_err(|_| invalid())?),
            };
            Ok(ResourceLimit { resource, value })
        })
        .collect()
}
