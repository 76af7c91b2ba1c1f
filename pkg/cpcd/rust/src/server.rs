// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! TCP accept loop. Each connection gets its own blocking session thread;
//! all sessions serialize on the registry lock.

use std::future::Future;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use crate::registry::Registry;
use crate::session::serve_client;

pub struct ControlServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, registry: Arc<Registry>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves. Sessions already
    /// running are not interrupted.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        match self.local_addr() {
            Ok(addr) => info!("listening on {addr}"),
            Err(e) => warn!("listening on unknown address: {e}"),
        }
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = self.start_session(stream, peer) {
                            error!("failed to start session for {peer}: {e}");
                        }
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
            }
        }
        info!("no longer accepting connections");
    }

    fn start_session(&self, stream: tokio::net::TcpStream, peer: SocketAddr) -> io::Result<()> {
        let stream: TcpStream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let registry = self.registry.clone();
        thread::Builder::new()
            .name(format!("cpcd-session-{peer}"))
            .spawn(move || {
                let peer = peer.to_string();
                if let Err(e) = serve_client(&registry, &peer, reader, &stream) {
                    debug!("session with {peer} ended: {e}");
                }
            })?;
        Ok(())
    }
}
