//! TCP front end answering each client with its own address and country.
//!
//! A fixed number of worker threads share one listener; every accepted
//! connection is handled on its own thread because animation replies stream
//! until the connection deadline.

mod animation;
mod response;

pub use animation::{Animation, AnimationMode, FRAME_INTERVAL};
pub use response::{http_response, json_body, text_body, Reply};

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::resolver::Resolver;

/// Maximum request bytes read from a client.
const REQUEST_BUFFER_SIZE: usize = 2048;

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Number of accept loops
    pub workers: usize,
    /// Lifetime of a connection, including any animation
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            workers: 3,
            connection_timeout: Duration::from_secs(60),
        }
    }
}

/// Bound listener plus the optional resolver used to look up peers.
pub struct Server {
    listener: TcpListener,
    resolver: Option<Arc<Resolver>>,
    config: ServerConfig,
}

impl Server {
    /// Bind the listener.
    ///
    /// Without a resolver the country part of every reply is empty.
    pub fn bind(config: ServerConfig, resolver: Option<Arc<Resolver>>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)?;
        Ok(Self {
            listener,
            resolver,
            config,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the worker threads.
    pub fn spawn_workers(&self) -> Result<Vec<JoinHandle<()>>> {
        (1..=self.config.workers.max(1))
            .map(|id| -> Result<JoinHandle<()>> {
                let listener = self.listener.try_clone()?;
                let resolver = self.resolver.clone();
                let timeout = self.config.connection_timeout;
                log::info!("Running worker {}", id);
                let handle = thread::Builder::new()
                    .name(format!("yourip-worker-{}", id))
                    .spawn(move || accept_loop(listener, resolver, timeout))?;
                Ok(handle)
            })
            .collect()
    }

    /// Serve until every worker exits, which in practice is never.
    pub fn run(self) -> Result<()> {
        log::info!("Listening on {}", self.local_addr()?);
        for worker in self.spawn_workers()? {
            if worker.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
        Ok(())
    }
}

fn accept_loop(listener: TcpListener, resolver: Option<Arc<Resolver>>, timeout: Duration) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("Accept error: {}", e);
                continue;
            }
        };
        log::info!("{} accepted", peer);

        let resolver = resolver.clone();
        let spawned = thread::Builder::new()
            .name("yourip-conn".to_string())
            .spawn(move || {
                match handle_connection(stream, peer, resolver.as_deref(), timeout) {
                    Ok(()) => log::info!("{} closed", peer),
                    Err(e) => log::info!("{} closed: {}", peer, e),
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn connection thread: {}", e);
        }
    }
}

/// Read one request from `stream` and write the matching reply.
pub fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    resolver: Option<&Resolver>,
    timeout: Duration,
) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut buffer = [0u8; REQUEST_BUFFER_SIZE];
    let read = stream.read(&mut buffer)?;
    let request = &buffer[..read];

    let ip = peer.ip().to_string();
    let country = match resolver.map(|r| r.query(peer.ip())) {
        Some(resolution) => {
            log::debug!("{} lookup: {}", ip, resolution.as_str());
            resolution.country().map(str::to_string).unwrap_or_default()
        }
        None => String::new(),
    };

    match Reply::classify(request) {
        Reply::RawText => {
            log::info!("Return tcp text response to {} ({})", ip, country);
            stream.write_all(text_body(&ip, &country).as_bytes())
        }
        Reply::Json => {
            log::info!("Return json response to {} ({})", ip, country);
            let body = json_body(&ip, &country)?;
            stream.write_all(http_response("application/json", &body).as_bytes())
        }
        Reply::HttpText => {
            log::info!("Return http text/plain response to {} ({})", ip, country);
            let body = text_body(&ip, &country);
            stream.write_all(http_response("text/plain", &body).as_bytes())
        }
        Reply::Animation(mode) => {
            let body = text_body(&ip, &country);
            log::info!("Stream animation to {} ({})", body, mode.as_str());
            animation::stream(
                &mut stream,
                Animation::new(mode, &body),
                FRAME_INTERVAL,
                deadline,
            )
        }
    }
}
