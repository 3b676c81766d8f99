use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use shrmpl_client::{ClientError, ErrorKind, KvClient, KvEntry, TcpOptions};

/// Accepts one client and answers `expected_commands` lines through `handler`.
fn spawn_server(expected_commands: usize, handler: fn(usize, String, &mut TcpStream)) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let mut line = String::new();
            if reader.read_line(&mut line).expect("read command") == 0 {
                return;
            }
            assert!(line.ends_with('\n'), "command must be newline terminated");
            handler(idx, line.trim_end_matches('\n').to_string(), &mut stream);
        }
    });

    port
}

fn reply(stream: &mut TcpStream, payload: &str) {
    let _ = stream.write_all(payload.as_bytes());
    let _ = stream.flush();
}

fn connected(port: u16) -> KvClient {
    let options = TcpOptions::default()
        .with_connect_timeout(Duration::from_secs(1))
        .with_read_timeout(Some(Duration::from_secs(2)));
    let mut client = KvClient::with_options(options);
    client.connect("127.0.0.1", port).expect("connect");
    client
}

#[test]
fn kv_set_get_roundtrip() {
    let port = spawn_server(3, |idx, line, stream| match idx {
        0 => {
            assert_eq!(line, "SET user:1 alice");
            reply(stream, "OK\n");
        }
        1 => {
            assert_eq!(line, "SET session:1 token 30s");
            reply(stream, "OK\n");
        }
        _ => {
            assert_eq!(line, "GET user:1");
            reply(stream, "alice\n");
        }
    });

    let mut client = connected(port);
    assert!(client.set("user:1", "alice", None).expect("set"));
    assert!(client.set("session:1", "token", Some("30s")).expect("set ttl"));
    assert_eq!(client.get("user:1").expect("get"), Some("alice".to_string()));
}

#[test]
fn kv_missing_key_is_not_an_error() {
    let port = spawn_server(2, |idx, line, stream| {
        if idx == 0 {
            assert_eq!(line, "GET ghost");
        } else {
            assert_eq!(line, "DEL ghost");
        }
        reply(stream, "ERROR key not found\n");
    });

    let mut client = connected(port);
    assert_eq!(client.get("ghost").expect("get"), None);
    assert!(!client.delete("ghost").expect("delete"));
}

#[test]
fn kv_incr_and_delete() {
    let port = spawn_server(4, |idx, line, stream| match idx {
        0 => {
            assert_eq!(line, "INCR hits");
            reply(stream, "1\n");
        }
        1 => {
            assert_eq!(line, "INCR hits 1min");
            reply(stream, "2\n");
        }
        2 => {
            assert_eq!(line, "INCR name");
            reply(stream, "not-a-number\n");
        }
        _ => {
            assert_eq!(line, "DEL hits");
            reply(stream, "OK\n");
        }
    });

    let mut client = connected(port);
    assert_eq!(client.incr("hits", None).expect("incr"), 1);
    assert_eq!(client.incr("hits", Some("1min")).expect("incr ttl"), 2);
    let err = client.incr("name", None).unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(ref text) if text == "not-a-number"));
    assert!(client.is_connected());
    assert!(client.delete("hits").expect("delete"));
}

#[test]
fn kv_server_errors_pass_through() {
    let port = spawn_server(1, |_, _, stream| {
        reply(stream, "ERROR value is not an integer\n");
    });

    let mut client = connected(port);
    let err = client.incr("name", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.to_string(), "ERROR value is not an integer");
}

#[test]
fn kv_ping_requires_exact_pong() {
    let port = spawn_server(2, |idx, line, stream| {
        assert_eq!(line, "PING");
        if idx == 0 {
            reply(stream, "PONG\r\n");
        } else {
            reply(stream, "PONg\n");
        }
    });

    let mut client = connected(port);
    assert!(client.ping().expect("ping"));
    assert!(!client.ping().expect("ping"));
}

#[test]
fn kv_notices_are_typed_errors() {
    let port = spawn_server(2, |idx, _, stream| {
        if idx == 0 {
            reply(stream, "UPONG\n");
        } else {
            reply(stream, "TERM\n");
        }
    });

    let mut client = connected(port);
    let err = client.get("k").unwrap_err();
    assert!(matches!(err, ClientError::Heartbeat));
    assert!(err.is_notice());
    assert_eq!(err.to_string(), "heartbeat received");

    let err = client.get("k").unwrap_err();
    assert!(matches!(err, ClientError::ShuttingDown));
    assert_eq!(err.to_string(), "server shutting down");
}

#[test]
fn kv_list_skips_malformed_lines() {
    let port = spawn_server(1, |_, line, stream| {
        assert_eq!(line, "LIST");
        reply(
            stream,
            "a=x=1,1700000000\nbroken line\nb=y=2,no-expiration\nc=z=3\n",
        );
    });

    let mut client = connected(port);
    let entries = client.list().expect("list");
    assert_eq!(
        entries,
        vec![
            KvEntry {
                key: "a".into(),
                value: "1".into(),
                expires_at: Some(1_700_000_000),
            },
            KvEntry {
                key: "b".into(),
                value: "2".into(),
                expires_at: None,
            },
        ]
    );

    let json = serde_json::to_value(&entries[0]).expect("json");
    assert_eq!(json["key"], "a");
    assert_eq!(json["expires_at"], 1_700_000_000);
}

#[test]
fn kv_empty_list_is_empty() {
    let port = spawn_server(1, |_, _, stream| reply(stream, "\n"));

    let mut client = connected(port);
    assert!(client.list().expect("list").is_empty());
}

#[test]
fn kv_reply_split_across_segments() {
    let port = spawn_server(1, |_, _, stream| {
        reply(stream, "hel");
        thread::sleep(Duration::from_millis(50));
        reply(stream, "lo\n");
    });

    let mut client = connected(port);
    assert_eq!(client.get("greeting").expect("get"), Some("hello".into()));
}

#[test]
fn kv_validation_sends_nothing() {
    // The server closes after one command; a second command would fail.
    let port = spawn_server(1, |_, line, stream| {
        assert_eq!(line, "PING");
        reply(stream, "PONG\n");
    });

    let mut client = connected(port);
    let long = "x".repeat(101);
    let err = client.set("k", &long, None).unwrap_err();
    assert_eq!(err.to_string(), "key or value length exceeds 100 characters");
    let err = client.get(&long).unwrap_err();
    assert_eq!(err.to_string(), "key length exceeds 100 characters");
    assert!(client.ping().expect("ping"));
}

#[test]
fn kv_server_close_drops_connection() {
    let port = spawn_server(1, |_, _, _| {});

    let mut client = connected(port);
    let err = client.get("k").unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!client.is_connected());
    assert!(matches!(client.ping(), Err(ClientError::NotConnected)));
}

#[test]
fn kv_abort_unblocks_pending_call() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        // Hold the socket open without ever replying.
        thread::sleep(Duration::from_secs(2));
        drop(stream);
    });

    let mut client = KvClient::new();
    client.connect("127.0.0.1", port).expect("connect");
    let handle = client.abort_handle().expect("handle");
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.abort().expect("abort");
    });

    let err = client.get("k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!client.is_connected());

    aborter.join().expect("aborter");
    server.join().expect("server");
}

#[test]
fn kv_connect_refused_is_transport_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let mut client = KvClient::new();
    let err = client.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, ClientError::Io(_)));
    assert!(!client.is_connected());
}
