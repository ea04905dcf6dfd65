use cantus::{
    bencode::{self, Decoder, Value},
    player::{self, FixedPlayer, PlayerState, PlayerSupervisor},
    registry::SessionRegistry,
    repl::{Config, Fields, Server},
};
use pretty_assertions::assert_eq;
use rosc::{decoder::decode, OscPacket};
use std::{
    io::{BufReader, Write},
    net::{TcpStream, UdpSocket},
    time::Duration,
};
use tempdir::TempDir;

struct Client {
    stream: TcpStream,
    decoder: Decoder<BufReader<TcpStream>>,
    next_id: i64,
}

impl Client {
    fn connect(port: u16) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let decoder = Decoder::new(BufReader::new(stream.try_clone().unwrap()));
        Client {
            stream,
            decoder,
            next_id: 0,
        }
    }

    fn request(&mut self, op: &str, params: &[(&str, &str)]) -> Fields {
        self.next_id += 1;
        let id = self.next_id.to_string();

        let mut message = Fields::new();
        message.insert("op".to_owned(), op.into());
        message.insert("id".to_owned(), id.clone().into());
        for (key, value) in params {
            message.insert(key.to_string(), (*value).into());
        }
        self.stream
            .write_all(&bencode::encode(&Value::Dict(message)))
            .unwrap();

        let response = match self.decoder.decode_next().unwrap() {
            Some(Value::Dict(response)) => response,
            other => panic!("unexpected response {:?}", other),
        };
        assert_eq!(response["id"].as_str(), Some(id.as_str()));
        response
    }
}

fn status(response: &Fields) -> Vec<String> {
    response["status"]
        .as_list()
        .unwrap()
        .iter()
        .map(|value| value.as_str().unwrap().to_owned())
        .collect()
}

fn fake_player() -> (UdpSocket, PlayerState) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, PlayerState::new("fake", port))
}

// Returns the addresses of the messages in the next packet the player receives.
fn received_addrs(player: &UdpSocket) -> Vec<String> {
    let mut buffer = [0_u8; 65536];
    let len = player.recv(&mut buffer).unwrap();
    match decode(&buffer[..len]).unwrap() {
        OscPacket::Message(message) => vec![message.addr],
        OscPacket::Bundle(bundle) => bundle
            .content
            .into_iter()
            .map(|packet| match packet {
                OscPacket::Message(message) => message.addr,
                OscPacket::Bundle(_) => panic!("nested bundle"),
            })
            .collect(),
    }
}

#[test]
fn test_session_server() {
    let dir = TempDir::new("session").unwrap();
    let registry = SessionRegistry::new(dir.path().join("repl-servers"));
    let (player, player_state) = fake_player();
    let config = Config::new(0).player_supervisor(FixedPlayer::new(player_state));
    let server = Server::start(config, &registry).unwrap();

    let info = registry.lookup(server.id()).unwrap().unwrap();
    assert_eq!(info.port, server.port());

    let mut client = Client::connect(server.port());
    let response = client.request("eval-and-play", &[("code", "piano: c d")]);
    assert_eq!(status(&response), vec!["done"]);
    assert_eq!(response["session"].as_str(), Some(server.id()));
    assert_eq!(
        received_addrs(&player),
        vec![
            "/track/1/midi/patch",
            "/track/1/midi/note",
            "/track/1/midi/note",
            "/system/play",
        ]
    );

    let response = client.request("eval-and-play", &[("code", "e")]);
    assert_eq!(status(&response), vec!["done"]);
    assert_eq!(
        received_addrs(&player),
        vec!["/track/1/midi/patch", "/track/1/midi/note", "/system/play"]
    );

    let response = client.request("eval-and-play", &[("code", "kazoo: c")]);
    assert_eq!(status(&response), vec!["done", "error"]);
    assert_eq!(
        response["problems"].as_list().unwrap()[0].as_str(),
        Some("input:3:1: unrecognized instrument: kazoo")
    );

    let response = client.request("score-text", &[]);
    assert_eq!(
        response["text"].as_str(),
        Some("piano: c d\ne\nkazoo: c")
    );

    let response = client.request("dance", &[]);
    assert_eq!(status(&response), vec!["done", "error", "unknown-op"]);

    let state_file = server.state_file();
    drop(server);
    assert!(!state_file.exists());
    assert_eq!(received_addrs(&player), vec!["/system/shutdown"]);
}

#[test]
fn test_connections_share_one_session() {
    let dir = TempDir::new("session").unwrap();
    let registry = SessionRegistry::new(dir.path());
    let server = Server::start(Config::new(0), &registry).unwrap();

    let mut first = Client::connect(server.port());
    let mut second = Client::connect(server.port());

    let response = first.request("load", &[("code", "violin: c d e")]);
    assert_eq!(status(&response), vec!["done"]);

    let response = second.request("score-events", &[]);
    let events: serde_json::Value =
        serde_json::from_str(response["events"].as_str().unwrap()).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 3);

    let response = second.request("eval-and-play", &[("code", "f")]);
    assert_eq!(
        response["problems"].as_list().unwrap()[0].as_str(),
        Some("no player is available")
    );
}

#[test]
fn test_malformed_request_closes_only_that_connection() {
    let dir = TempDir::new("session").unwrap();
    let registry = SessionRegistry::new(dir.path());
    let server = Server::start(Config::new(0), &registry).unwrap();

    let mut broken = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    broken.write_all(b"x").unwrap();

    let mut client = Client::connect(server.port());
    let response = client.request("describe", &[]);
    assert_eq!(status(&response), vec!["done"]);
}

#[derive(Debug)]
struct PanickingSupervisor;

impl PlayerSupervisor for PanickingSupervisor {
    fn find_available_player(&mut self) -> player::Result<PlayerState> {
        panic!("no players left");
    }
}

#[test]
fn test_panicking_request_leaves_server_running() {
    let dir = TempDir::new("session").unwrap();
    let registry = SessionRegistry::new(dir.path());
    let config = Config::new(0).player_supervisor(PanickingSupervisor);
    let server = Server::start(config, &registry).unwrap();

    let mut client = Client::connect(server.port());
    let response = client.request("eval-and-play", &[("code", "piano: c")]);
    assert_eq!(status(&response), vec!["done", "error"]);

    let mut other = Client::connect(server.port());
    let response = other.request("load", &[("code", "piano: c d")]);
    assert_eq!(status(&response), vec!["done", "error"]);
    let response = other.request("score-text", &[]);
    assert_eq!(status(&response), vec!["done"]);
    assert_eq!(response["text"].as_str(), Some(""));
    assert!(server.state_file().exists());
}

