use std::io::Read;
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use shrmpl_client::{
    ClientError, LogClient, LogDestination, LogLevel, Logger, LoggerConfig, Settings,
};

/// Accepts one client and forwards everything it writes until EOF.
fn spawn_sink() -> (u16, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut received = Vec::new();
        let _ = stream.read_to_end(&mut received);
        let _ = tx.send(received);
    });

    (port, rx)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn log_client_writes_exact_frames() {
    init_tracing();
    let (port, rx) = spawn_sink();

    let mut client = LogClient::new();
    client.connect("127.0.0.1", port).expect("connect");
    client
        .send("INFO", "example-host", "T001", "hi")
        .expect("send");
    client
        .send("ERRO", "db-01", "E500", "disk full")
        .expect("send");
    client.close();
    assert!(!client.is_connected());

    let received = rx.recv_timeout(Duration::from_secs(3)).expect("frames");
    let text = String::from_utf8(received).expect("utf8");
    let expected = format!(
        "[INFO] [example-host{}] [T001] [0002]: hi\n[ERRO] [db-01{}] [E500] [0009]: disk full\n",
        " ".repeat(20),
        " ".repeat(27),
    );
    assert_eq!(text, expected);
}

#[test]
fn log_client_rejects_invalid_records() {
    let (port, rx) = spawn_sink();

    let mut client = LogClient::new();
    client.connect("127.0.0.1", port).expect("connect");

    let long_host = "h".repeat(33);
    let long_message = "m".repeat(4097);
    let cases = [
        (client.send("INF", "h", "T001", "m"), "level must be exactly 4 characters"),
        (client.send("INFO", &long_host, "T001", "m"), "host must be <= 32 characters"),
        (client.send("INFO", "h", "T1", "m"), "code must be exactly 4 characters"),
        (client.send("INFO", "h", "T001", &long_message), "message must be <= 4096 characters"),
    ];
    for (result, message) in cases {
        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(err.to_string(), message);
    }
    assert!(client.is_connected());
    client.close();

    let received = rx.recv_timeout(Duration::from_secs(3)).expect("frames");
    assert!(received.is_empty(), "invalid records must not be written");
}

#[test]
fn log_client_send_requires_connection() {
    let mut client = LogClient::new();
    let err = client.send("INFO", "h", "T001", "m").unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[test]
fn logger_filters_and_delivers() {
    init_tracing();
    let (port, rx) = spawn_sink();

    let mut logger = Logger::new(LoggerConfig {
        destination: Some(LogDestination {
            host: "127.0.0.1".into(),
            port,
        }),
        host: "api-01".into(),
        min_level: LogLevel::Info,
        send_activity: false,
        ..LoggerConfig::default()
    });

    logger.debug("D001", "dropped by level").expect("debug");
    logger.activity("A001", "dropped by toggle").expect("activity");
    logger.info("I001", "service started").expect("info");
    logger.warn("W001", "slow query").expect("warn");
    logger.close();

    let received = rx.recv_timeout(Duration::from_secs(3)).expect("frames");
    let text = String::from_utf8(received).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2, "{}", text);
    assert!(lines[0].starts_with("[INFO] [api-01"));
    assert!(lines[0].ends_with("[I001] [0015]: service started"));
    assert!(lines[1].starts_with("[WARN] [api-01"));
}

#[test]
fn logger_config_from_settings_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("shrmpl.env");
    std::fs::write(
        &path,
        "# logger\nSLOG_DEST=127.0.0.1:7379\nSERVER_NAME=worker-7\nLOG_LEVEL=WARN\nSEND_LOG=false\n",
    )
    .expect("write");

    let settings = Settings::from_file(&path).expect("settings");
    let config = LoggerConfig::from_settings(&settings).expect("config");
    assert_eq!(config.host, "worker-7");
    assert_eq!(config.min_level, LogLevel::Warn);
    assert!(!config.send_log);

    // Delivery disabled: nothing connects even though the sink is unreachable.
    let mut logger = Logger::new(config);
    logger.error("E001", "local only").expect("error");
}
