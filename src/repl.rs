// Cantus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Interactive session servers.
//!
//! A [`Server`] owns one [`Session`] and accepts client connections over TCP. Clients send
//! bencode dictionaries with an `op` field and receive one dictionary in response to each.
//!
//! # Requests
//!
//! | Op | Parameters | Response fields |
//! |---|---|---|
//! | `describe` | | `ops`, `versions` |
//! | `eval-and-play` | `code` | |
//! | `load` | `code` | |
//! | `new-score` | | |
//! | `replay` | | |
//! | `stop` | | |
//! | `score-text` | | `text` |
//! | `score-events` | | `events` (JSON) |
//! | `score-data` | | `data` (JSON) |
//! | `score-ast` | | `ast` (JSON) |
//! | `instruments` | | `instruments` |
//!
//! Every response echoes the request's `id`, names the `session`, and has a `status` list. The
//! status of a successful request is `["done"]`. A failed request has the status
//! `["done", "error"]` and a list of `problems`, and an unknown op has the status
//! `["done", "error", "unknown-op"]`.
//!
//! # Threads
//!
//! Each connection is read on its own thread, which only decodes requests and queues them. A
//! single worker thread takes requests off the queue one at a time and carries them out, so
//! the session is never touched by two requests at once. Responses are written to the
//! connection the request arrived on.
//!
//! # Examples
//!
//! ```no_run
//! use cantus::{
//!     player::{FixedPlayer, PlayerState},
//!     registry::SessionRegistry,
//!     repl::{Config, Server},
//! };
//!
//! let registry = SessionRegistry::from_env();
//! let config = Config::new(27278)
//!     .player_supervisor(FixedPlayer::new(PlayerState::new("player1", 27279)));
//! let server = Server::start(config, &registry)?;
//! println!("session {} listening on port {}", server.id(), server.port());
//! # cantus::repl::Result::Ok(())
//! ```

mod protocol;
pub mod session;

pub use protocol::{handle, respond_done, respond_error, Fields, Op, Request};
pub use session::Session;

use crate::{
    bencode::{Decoder, Value},
    player::PlayerSupervisor,
    registry::{self, SessionInfo, SessionRegistry},
};
use std::{
    io::{self, BufReader},
    net::{Shutdown, TcpListener, TcpStream},
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

/// A specialized [`Result`] type for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned when a server cannot start.
#[derive(Debug, Error)]
pub enum Error {
    #[error("listening on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("registering session: {0}")]
    Registry(#[from] registry::Error),
}

/// Settings for a [`Server`].
#[derive(Debug)]
pub struct Config {
    port: u16,
    supervisor: Option<Box<dyn PlayerSupervisor + Send>>,
}

impl Config {
    /// Listen on `port` of the loopback interface. Port 0 picks any free port.
    pub fn new(port: u16) -> Config {
        Config {
            port,
            supervisor: None,
        }
    }

    /// Sets where the session gets players from.
    pub fn player_supervisor(
        mut self,
        supervisor: impl PlayerSupervisor + Send + 'static,
    ) -> Config {
        self.supervisor = Some(Box::new(supervisor));
        self
    }
}

#[derive(Debug)]
enum WorkerMessage {
    Request(Request),
    Shutdown,
}

/// A running session server.
///
/// Dropping the server stops it: its discovery file is removed, the player is told to exit and
/// no more connections are accepted.
#[derive(Debug)]
pub struct Server {
    id: String,
    port: u16,
    registry: SessionRegistry,
    requests: mpsc::Sender<WorkerMessage>,
    stopping: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Server {
    /// Starts a server with a new session and registers it in `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be listened on or the discovery file cannot be
    /// written.
    pub fn start(config: Config, registry: &SessionRegistry) -> Result<Server> {
        let id = generate_id();
        let listener = TcpListener::bind(("127.0.0.1", config.port)).map_err(|source| {
            Error::Listen {
                port: config.port,
                source,
            }
        })?;
        let port = listener
            .local_addr()
            .map_err(|source| Error::Listen {
                port: config.port,
                source,
            })?
            .port();

        let mut session = Session::new(id.clone());
        if let Some(supervisor) = config.supervisor {
            session = session.with_supervisor(supervisor);
        }

        registry.register(&SessionInfo {
            id: id.clone(),
            port,
            pid: process::id(),
        })?;

        let (requests, queue) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = thread::spawn(move || run_worker(session, queue));
        let acceptor = {
            let requests = requests.clone();
            let stopping = Arc::clone(&stopping);
            thread::spawn(move || accept_loop(listener, requests, stopping))
        };

        log::info!("session {} listening on port {}", id, port);
        Ok(Server {
            id,
            port,
            registry: registry.clone(),
            requests,
            stopping,
            acceptor: Some(acceptor),
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The path of this server's discovery file.
    pub fn state_file(&self) -> PathBuf {
        self.registry.state_file(&self.id)
    }

    /// Stops the server and waits for its threads to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("stopping session {}", self.id);
        if let Err(err) = self.registry.unregister(&self.id) {
            log::warn!("session {}: {}", self.id, err);
        }

        let _ = self.requests.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("session {}: worker thread panicked", self.id);
            }
        }

        // Wake the acceptor so it sees the stop flag.
        if let Err(err) = TcpStream::connect(("127.0.0.1", self.port)) {
            log::warn!("session {}: waking acceptor: {}", self.id, err);
        }
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                log::error!("session {}: acceptor thread panicked", self.id);
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Generates a session id of three random lowercase letters.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().as_bytes()[..3]
        .iter()
        .map(|byte| char::from(b'a' + byte % 26))
        .collect()
}

fn run_worker(mut session: Session, queue: mpsc::Receiver<WorkerMessage>) {
    while let Ok(message) = queue.recv() {
        match message {
            WorkerMessage::Request(request) => handle(&mut session, request),
            WorkerMessage::Shutdown => break,
        }
    }
    if session.has_player() {
        if let Err(err) = session.shutdown_player() {
            log::warn!("session {}: shutting down player: {}", session.id(), err);
        }
    }
    log::debug!("session {}: worker stopped", session.id());
}

fn accept_loop(
    listener: TcpListener,
    requests: mpsc::Sender<WorkerMessage>,
    stopping: Arc<AtomicBool>,
) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let requests = requests.clone();
                thread::spawn(move || serve_connection(stream, requests));
            }
            Err(err) => log::warn!("accepting connection: {}", err),
        }
    }
}

fn serve_connection(stream: TcpStream, requests: mpsc::Sender<WorkerMessage>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown peer".to_owned());
    log::debug!("connection from {}", peer);

    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            log::error!("{}: cloning stream: {}", peer, err);
            return;
        }
    };
    let mut decoder = Decoder::new(BufReader::new(reader));
    loop {
        let message = match decoder.decode_next() {
            Ok(Some(Value::Dict(message))) => message,
            Ok(Some(other)) => {
                log::warn!("{}: ignoring non-dictionary message {:?}", peer, other);
                continue;
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("{}: decoding request: {}", peer, err);
                break;
            }
        };
        let responder = match stream.try_clone() {
            Ok(responder) => responder,
            Err(err) => {
                log::error!("{}: cloning stream: {}", peer, err);
                break;
            }
        };
        let request = Request::new(message, Box::new(responder));
        if requests.send(WorkerMessage::Request(request)).is_err() {
            break;
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    log::debug!("connection from {} closed", peer);
}
