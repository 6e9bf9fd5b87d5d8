use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use tidewater_config::ListenAddress;

use super::*;
use crate::instance::{DatabaseMetadata, Instance};
use crate::query::{Grammar, PropertyTable};
use crate::reactor::{Reactor, ResourceKind};
use crate::registry::InstanceRegistry;

struct ClientFixture {
    registry: Rc<InstanceRegistry>,
    handler: ClientHandler,
}

#[fixture]
fn client() -> ClientFixture {
    let registry = Rc::new(InstanceRegistry::new(|_| {}));
    let path = PathBuf::from("/srv/tidewater/weather/");
    registry.append(Instance::new(
        "weather",
        path.clone(),
        path,
        DatabaseMetadata::new("weather"),
    ));
    let handler = ClientHandler::new(
        Rc::clone(&registry),
        Rc::new(Grammar::compile()),
        Rc::new(PropertyTable::new()),
    );
    ClientFixture { registry, handler }
}

fn session() -> Session {
    Session::new(ListenerKind::Client, SocketAddr::from(([127, 0, 0, 1], 4000)))
}

#[rstest]
fn statements_require_a_database(client: ClientFixture) {
    let session = session();
    assert_eq!(
        client.handler.respond("select * from 'cpu'", &session),
        "error no database selected"
    );
    assert_eq!(
        client.handler.respond("use nowhere", &session),
        "error unknown database 'nowhere'"
    );
    assert_eq!(client.handler.respond("use weather", &session), "ok use");
    assert_eq!(
        client.handler.respond("select * from 'cpu'", &session),
        "ok select"
    );
    assert_eq!(
        client.handler.respond("frobnicate", &session),
        "error unknown statement 'frobnicate'"
    );
}

#[rstest]
fn show_reads_properties(client: ClientFixture) {
    let session = session();
    client.handler.respond("use weather", &session);
    assert_eq!(
        client.handler.respond("show dbname, time_precision", &session),
        "ok show dbname=weather time_precision=ms"
    );
    assert_eq!(
        client.handler.respond("show uptime", &session),
        "error unknown property 'uptime'"
    );
}

#[rstest]
fn session_lease_is_counted_and_released(client: ClientFixture) {
    let handle = client.registry.find("weather").expect("registered instance");
    let session = session();
    client.handler.respond("use weather", &session);
    assert_eq!(client.registry.ref_count(handle), Some(2));
    client.handler.respond("use weather", &session);
    assert_eq!(client.registry.ref_count(handle), Some(2));
    drop(session);
    assert_eq!(client.registry.ref_count(handle), Some(1));
}

#[test]
fn occupied_port_reports_bind_error() {
    let reactor = Reactor::new().expect("build reactor");
    let occupied = StdTcpListener::bind("127.0.0.1:0").expect("bind blocking listener");
    let port = occupied.local_addr().expect("blocking listener address").port();
    let handler: Rc<dyn ConnectionHandler> = Rc::new(BackendHandler);

    let error = start_listener(
        &reactor,
        ListenerKind::Backend,
        &ListenAddress::new("127.0.0.1", port),
        handler,
    )
    .expect_err("second bind must fail");
    assert!(matches!(error, ListenerError::Bind { .. }), "got {error:?}");
    assert_eq!(reactor.live_handles(), 0);
}

#[rstest]
fn serves_clients_and_closes_in_walk(client: ClientFixture) {
    let reactor = Reactor::new().expect("build reactor");
    let handler: Rc<dyn ConnectionHandler> = Rc::new(client.handler.clone());
    let addr = start_listener(
        &reactor,
        ListenerKind::Client,
        &ListenAddress::new("127.0.0.1", 0),
        handler,
    )
    .expect("start client listener");

    let conversation = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("connect client");
        stream
            .write_all(b"use weather\nlist series\n")
            .expect("send statements");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut replies = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read reply");
            replies.push(line.trim_end().to_owned());
        }
        (stream, replies)
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !conversation.is_finished() && Instant::now() < deadline {
        reactor.run_for(Duration::from_millis(10));
    }
    let (stream, replies) = conversation.join().expect("client thread");
    assert_eq!(replies, ["ok use", "ok list"]);

    let handle = client.registry.find("weather").expect("registered instance");
    assert_eq!(reactor.resources().count(ResourceKind::Tcp), 2);
    assert_eq!(client.registry.ref_count(handle), Some(2));

    reactor.close_all();
    reactor.drain();
    assert_eq!(reactor.live_handles(), 0);
    assert_eq!(client.registry.ref_count(handle), Some(1));
    drop(stream);
}
