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

//! Requests, responses and the operations a session server understands.

use super::session::{self, Session};
use crate::{
    bencode::{self, Value},
    model,
};
use std::{
    collections::BTreeMap,
    fmt,
    io::Write,
    panic::{self, AssertUnwindSafe},
};
use thiserror::Error;

/// The fields of a bencode dictionary.
pub type Fields = BTreeMap<String, Value>;

/// A decoded request and the connection its response goes to.
pub struct Request {
    message: Fields,
    responder: Box<dyn Write + Send>,
}

impl Request {
    pub fn new(message: Fields, responder: Box<dyn Write + Send>) -> Request {
        Request { message, responder }
    }

    pub fn op(&self) -> Option<&str> {
        self.str_field("op")
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.message.get(key).and_then(Value::as_str)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("message", &self.message)
            .finish()
    }
}

/// The operations of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Describe,
    EvalAndPlay,
    Load,
    NewScore,
    Replay,
    Stop,
    ScoreText,
    ScoreEvents,
    ScoreData,
    ScoreAst,
    Instruments,
}

impl Op {
    pub const ALL: [Op; 11] = [
        Op::Describe,
        Op::EvalAndPlay,
        Op::Load,
        Op::NewScore,
        Op::Replay,
        Op::Stop,
        Op::ScoreText,
        Op::ScoreEvents,
        Op::ScoreData,
        Op::ScoreAst,
        Op::Instruments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Op::Describe => "describe",
            Op::EvalAndPlay => "eval-and-play",
            Op::Load => "load",
            Op::NewScore => "new-score",
            Op::Replay => "replay",
            Op::Stop => "stop",
            Op::ScoreText => "score-text",
            Op::ScoreEvents => "score-events",
            Op::ScoreData => "score-data",
            Op::ScoreAst => "score-ast",
            Op::Instruments => "instruments",
        }
    }

    pub fn from_name(name: &str) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| op.name() == name)
    }

    fn run(self, session: &mut Session, request: &Request) -> Result<Fields> {
        let mut fields = Fields::new();
        match self {
            Op::Describe => {
                let ops = Op::ALL
                    .iter()
                    .map(|op| (op.name().to_owned(), Value::Dict(Fields::new())))
                    .collect::<Fields>();
                let mut versions = Fields::new();
                versions.insert("cantus".to_owned(), env!("CARGO_PKG_VERSION").into());
                fields.insert("ops".to_owned(), Value::Dict(ops));
                fields.insert("versions".to_owned(), Value::Dict(versions));
            }
            Op::EvalAndPlay => session.eval_and_play(code(request)?)?,
            Op::Load => session.load(code(request)?)?,
            Op::NewScore => session.new_score()?,
            Op::Replay => session.replay()?,
            Op::Stop => session.stop()?,
            Op::ScoreText => {
                fields.insert("text".to_owned(), session.input().into());
            }
            Op::ScoreEvents => {
                let events = serde_json::to_string(&session.score().events)?;
                fields.insert("events".to_owned(), events.into());
            }
            Op::ScoreData => {
                let data = serde_json::to_string(&session.score().to_json())?;
                fields.insert("data".to_owned(), data.into());
            }
            Op::ScoreAst => {
                let ast = session
                    .parsed_input()?
                    .iter()
                    .map(|update| update.to_json())
                    .collect::<Vec<_>>();
                fields.insert("ast".to_owned(), serde_json::to_string(&ast)?.into());
            }
            Op::Instruments => {
                let instruments = model::stock_instruments().collect::<Vec<_>>();
                fields.insert("instruments".to_owned(), instruments.into());
            }
        }
        Ok(fields)
    }
}

type Result<T> = std::result::Result<T, Problem>;

// Why a request could not be carried out. Reported to the client in `problems`.
#[derive(Debug, Error)]
enum Problem {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error("encoding JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn code(request: &Request) -> Result<&str> {
    request
        .str_field("code")
        .ok_or(Problem::MissingParameter("code"))
}

/// Carries out a request against a session and responds to it.
///
/// If carrying out the request panics, the session's score is reset and the request fails.
pub fn handle(session: &mut Session, request: Request) {
    let op = match request.op().map(|name| (name, Op::from_name(name))) {
        Some((_, Some(op))) => op,
        Some((name, None)) => {
            log::warn!("session {}: unknown op {:?}", session.id(), name);
            return respond(
                session.id(),
                request,
                Fields::new(),
                &["done", "error", "unknown-op"],
            );
        }
        None => {
            return respond_error(session.id(), request, "request has no op");
        }
    };

    log::debug!("session {}: handling {}", session.id(), op.name());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| op.run(session, &request)));
    match outcome {
        Ok(Ok(fields)) => respond_done(session.id(), request, fields),
        Ok(Err(err)) => {
            log::debug!("session {}: {} failed: {}", session.id(), op.name(), err);
            respond_error(session.id(), request, &err.to_string())
        }
        Err(_) => {
            log::error!("session {}: {} panicked, resetting score", session.id(), op.name());
            session.reset_state();
            let problem = format!("internal error during {}; the score was reset", op.name());
            respond_error(session.id(), request, &problem)
        }
    }
}

/// Responds to a request that succeeded.
pub fn respond_done(session_id: &str, request: Request, fields: Fields) {
    respond(session_id, request, fields, &["done"]);
}

/// Responds to a request that failed.
pub fn respond_error(session_id: &str, request: Request, problem: &str) {
    let mut fields = Fields::new();
    fields.insert("problems".to_owned(), vec![problem].into());
    respond(session_id, request, fields, &["done", "error"]);
}

fn respond(session_id: &str, request: Request, mut fields: Fields, status: &[&str]) {
    let Request {
        message,
        mut responder,
    } = request;
    if let Some(id) = message.get("id") {
        fields.insert("id".to_owned(), id.clone());
    }
    fields.insert("session".to_owned(), session_id.into());
    fields.insert("status".to_owned(), status.to_vec().into());

    let bytes = bencode::encode(&Value::Dict(fields));
    if let Err(err) = responder.write_all(&bytes).and_then(|_| responder.flush()) {
        log::error!("session {}: writing response: {}", session_id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bencode::Decoder,
        player::{self, PlayerState, PlayerSupervisor},
    };
    use pretty_assertions::assert_eq;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn responses(&self) -> Vec<Fields> {
            let bytes = self.0.lock().unwrap().clone();
            let mut decoder = Decoder::new(&bytes[..]);
            let mut responses = Vec::new();
            while let Some(value) = decoder.decode_next().unwrap() {
                match value {
                    Value::Dict(fields) => responses.push(fields),
                    other => panic!("unexpected response {:?}", other),
                }
            }
            responses
        }
    }

    fn request(pairs: &[(&str, &str)], buffer: &SharedBuffer) -> Request {
        let message = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect();
        Request::new(message, Box::new(buffer.clone()))
    }

    fn status(fields: &Fields) -> Vec<&str> {
        fields["status"]
            .as_list()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_respond_done_writes_bencode() {
        let buffer = SharedBuffer::default();
        let mut fields = Fields::new();
        fields.insert("foo".to_owned(), "bar".into());
        respond_done("abc", request(&[("id", "1")], &buffer), fields);

        let responses = buffer.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(status(&responses[0]), vec!["done"]);
        assert_eq!(responses[0]["id"].as_str(), Some("1"));
        assert_eq!(responses[0]["foo"].as_str(), Some("bar"));
        assert_eq!(responses[0]["session"].as_str(), Some("abc"));
    }

    #[test]
    fn test_handle_unknown_op() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(&mut session, request(&[("op", "dance"), ("id", "2")], &buffer));

        let responses = buffer.responses();
        assert_eq!(status(&responses[0]), vec!["done", "error", "unknown-op"]);
        assert_eq!(responses[0]["id"].as_str(), Some("2"));
    }

    #[test]
    fn test_handle_describe() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(&mut session, request(&[("op", "describe")], &buffer));

        let response = &buffer.responses()[0];
        assert_eq!(status(response), vec!["done"]);
        let ops = response["ops"].as_dict().unwrap();
        assert_eq!(ops.len(), Op::ALL.len());
        assert!(ops.contains_key("eval-and-play"));
    }

    #[test]
    fn test_handle_eval_and_play_without_player() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(
            &mut session,
            request(&[("op", "eval-and-play"), ("code", "piano: c")], &buffer),
        );

        let response = &buffer.responses()[0];
        assert_eq!(status(response), vec!["done", "error"]);
        let problems = response["problems"].as_list().unwrap();
        assert_eq!(problems[0].as_str(), Some("no player is available"));
    }

    #[test]
    fn test_handle_missing_code() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(&mut session, request(&[("op", "load")], &buffer));

        let response = &buffer.responses()[0];
        assert_eq!(
            response["problems"].as_list().unwrap()[0].as_str(),
            Some("missing parameter: code")
        );
    }

    #[test]
    fn test_handle_load_and_inspect() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(
            &mut session,
            request(&[("op", "load"), ("code", "piano: c d")], &buffer),
        );
        handle(&mut session, request(&[("op", "score-text")], &buffer));
        handle(&mut session, request(&[("op", "score-events")], &buffer));
        handle(&mut session, request(&[("op", "score-ast")], &buffer));

        let responses = buffer.responses();
        assert_eq!(status(&responses[0]), vec!["done"]);
        assert_eq!(responses[1]["text"].as_str(), Some("piano: c d"));

        let events: serde_json::Value =
            serde_json::from_str(responses[2]["events"].as_str().unwrap()).unwrap();
        assert_eq!(events.as_array().unwrap().len(), 2);
        assert_eq!(events[1]["midi_note"], 62);

        let ast: serde_json::Value =
            serde_json::from_str(responses[3]["ast"].as_str().unwrap()).unwrap();
        assert_eq!(ast[0]["type"], "part-declaration");
    }

    #[test]
    fn test_handle_request_without_op() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc");
        handle(&mut session, request(&[("id", "3")], &buffer));

        let response = &buffer.responses()[0];
        assert_eq!(status(response), vec!["done", "error"]);
    }

    #[derive(Debug)]
    struct PanickingSupervisor;

    impl PlayerSupervisor for PanickingSupervisor {
        fn find_available_player(&mut self) -> player::Result<PlayerState> {
            panic!("supervisor failed");
        }
    }

    #[test]
    fn test_handle_survives_panicking_request() {
        let buffer = SharedBuffer::default();
        let mut session = Session::new("abc").with_supervisor(Box::new(PanickingSupervisor));
        session.update_score_with_input("piano: c d").unwrap();
        handle(
            &mut session,
            request(&[("op", "eval-and-play"), ("code", "e")], &buffer),
        );
        handle(&mut session, request(&[("op", "score-text")], &buffer));

        let responses = buffer.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(status(&responses[0]), vec!["done", "error"]);
        assert_eq!(
            responses[0]["problems"].as_list().unwrap()[0].as_str(),
            Some("internal error during eval-and-play; the score was reset")
        );
        assert_eq!(status(&responses[1]), vec!["done"]);
        assert_eq!(responses[1]["text"].as_str(), Some(""));
        assert!(session.score().events.is_empty());
    }
}
