use std::io::BufRead;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Write;
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use api_types::FilterClause;
use api_types::FilterSet;
use similar_asserts::assert_eq;
use test_log::test;
use watchdog::StreamWatchdog;
use watchdog::TcpWatchdog;
use watchdog::Watchdog;
use watchdog::WatchdogConfig;
use watchdog::WatchdogError;

fn tricky_filters() -> FilterSet {
    FilterSet::new()
        .with_clause(FilterClause::label("app", "a=b").unwrap())
        .with_clause(FilterClause::label("owner", "x&y").unwrap())
        .with_clause(FilterClause::label("team", "blue team").unwrap())
}

#[test]
fn acknowledged_registration_writes_encoded_line() {
    let watchdog = StreamWatchdog::new(Cursor::new(b"ACK\n".to_vec()), Vec::new());

    let accepted = watchdog.register(&tricky_filters()).expect("round trip");
    assert!(accepted);

    let (_, written) = watchdog.into_parts();
    assert_eq!(
        String::from_utf8(written).unwrap(),
        "label=app%3Da%3Db&label=owner%3Dx%26y&label=team%3Dblue+team\n"
    );
}

#[test]
fn stream_closed_before_ack_is_not_an_error() {
    let watchdog = StreamWatchdog::new(Cursor::new(b"hello\nworld\n".to_vec()), Vec::new());

    let accepted = watchdog.register(&tricky_filters()).expect("closure is not a fault");
    assert!(!accepted);
}

#[test]
fn several_registrations_share_one_stream() {
    let watchdog = StreamWatchdog::new(Cursor::new(b"ACK\nack\n".to_vec()), Vec::new());
    let first = FilterSet::new().with_clause(FilterClause::label("a", "1").unwrap());
    let second = FilterSet::new().with_clause(FilterClause::label("b", "2").unwrap());

    assert!(watchdog.register(&first).unwrap());
    assert!(watchdog.register(&second).unwrap());
    assert!(!watchdog.register(&first).unwrap());

    let (_, written) = watchdog.into_parts();
    assert_eq!(
        String::from_utf8(written).unwrap(),
        "label=a%3D1\nlabel=b%3D2\nlabel=a%3D1\n"
    );
}

/// Spawns a one-connection watchdog that reads a single line, reports it and
/// optionally acknowledges it.
fn spawn_watchdog(ack: bool) -> (String, mpsc::Receiver<String>, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        tx.send(line).expect("report line");
        if ack {
            stream.write_all(b"ACK\n").expect("write ack");
        }
    });

    (addr, rx, handle)
}

#[test]
fn tcp_round_trip_against_local_watchdog() {
    let (addr, lines, handle) = spawn_watchdog(true);
    let config = WatchdogConfig::default().with_ack_timeout(Duration::from_secs(5));

    let watchdog = TcpWatchdog::connect_tcp(&addr, &config).expect("connect");
    let filters = FilterSet::new().with_clause(FilterClause::label("reaper.managed", "true").unwrap());
    assert!(watchdog.register(&filters).expect("round trip"));

    assert_eq!(lines.recv().unwrap(), "label=reaper.managed%3Dtrue\n");
    handle.join().unwrap();
}

#[test]
fn tcp_watchdog_hanging_up_means_not_registered() {
    let (addr, _lines, handle) = spawn_watchdog(false);

    let watchdog = TcpWatchdog::connect_tcp(&addr, &WatchdogConfig::default()).expect("connect");

    let filters = FilterSet::new().with_clause(FilterClause::label("a", "b").unwrap());
    match watchdog.register(&filters) {
        Ok(accepted) => assert!(!accepted),
        // a reset connection is equally a sign the watchdog is unavailable
        Err(WatchdogError::Io(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
    handle.join().unwrap();
}

#[test]
fn connect_to_closed_port_fails() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let config = WatchdogConfig::default().with_connect_timeout(Duration::from_millis(500));

    let err = TcpWatchdog::connect_tcp(&addr, &config).unwrap_err();
    assert!(matches!(err, WatchdogError::Connect { .. }), "got {err:?}");
}
