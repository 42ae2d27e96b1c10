use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cramrpc_auth::KeyRecord;
use cramrpc_peer::envelope::{client_check_header, finish_request};
use cramrpc_peer::{Call, Client, ClientConfig, DatagramTransport, Server, ServerConfig};
use cramrpc_transport::DatagramSocket;
use cramrpc_wire::ids::{PARAM_OBJECT, PARAM_PROCEDURE, PARAM_STATUS};
use cramrpc_wire::{pack_version, Header, ParamBuffer, Status, CLIENT_ID_ASSIGN};

const COUNT: u32 = 0x2000_0002;
const TEXT: u32 = 0x2000_0007;

struct Fixture {
    socket: DatagramSocket,
    addr: SocketAddr,
    runs: Arc<AtomicUsize>,
    handle: cramrpc_peer::ServerHandle,
}

fn fixture(keys: &[&[u8]]) -> Fixture {
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);
    let mut builder = Server::builder(ServerConfig {
        workers: 4,
        poll_interval: Duration::from_millis(20),
        ..ServerConfig::default()
    })
    .procedure(COUNT, move |call: &mut Call<'_>| {
        let n = seen.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        let text = call.input().get_str(TEXT).to_uppercase();
        match call
            .output()
            .set_str(TEXT, &text)
            .and_then(|()| call.output().set_u32(COUNT, n))
        {
            Ok(()) => Status::Ok,
            Err(_) => Status::Fail,
        }
    });
    for key in keys {
        builder = builder.key(KeyRecord::new(key));
    }
    let server = builder.build().expect("server");
    let bound = DatagramSocket::bind("127.0.0.1:0").expect("bind");
    let addr = bound.local_addr().expect("addr");
    let handle = server.serve_datagram(bound).expect("serve");
    Fixture {
        socket: DatagramSocket::connect(addr).expect("connect"),
        addr,
        runs,
        handle,
    }
}

fn request(sequence: u32, client_id: u32) -> Vec<u8> {
    request_in(0, sequence, client_id)
}

fn request_in(session: u32, sequence: u32, client_id: u32) -> Vec<u8> {
    let mut buf = ParamBuffer::new(512);
    let out = buf.output_mut();
    out.set_str(TEXT, "hello").unwrap();
    out.set_u32(PARAM_PROCEDURE, COUNT).unwrap();
    out.set_u32(PARAM_OBJECT, 0).unwrap();
    finish_request(out, session, sequence, client_id);
    out.message().to_vec()
}

fn receive(socket: &DatagramSocket) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 2048];
    socket
        .recv(&mut buf, Duration::from_millis(500))
        .ok()
        .map(|len| buf[..len].to_vec())
}

#[test]
fn duplicate_datagrams_execute_once_with_identical_replies() {
    let fx = fixture(&[]);
    let message = request(1, CLIENT_ID_ASSIGN);
    for _ in 0..5 {
        fx.socket.send(&message).expect("send");
    }

    let mut replies = Vec::new();
    while let Some(reply) = receive(&fx.socket) {
        replies.push(reply);
    }
    // Duplicates that arrive while the first copy runs are dropped; every
    // reply that does come back is the same bytes.
    assert!(!replies.is_empty());
    assert!(replies.iter().all(|reply| reply == &replies[0]));
    assert_eq!(fx.runs.load(Ordering::SeqCst), 1);

    // A later retransmission is answered from the cache.
    fx.socket.send(&message).expect("send");
    assert_eq!(receive(&fx.socket).expect("cached reply"), replies[0]);
    assert_eq!(fx.runs.load(Ordering::SeqCst), 1);

    let mut buf = ParamBuffer::new(512);
    buf.input_mut().load(&replies[0]).unwrap();
    client_check_header(buf.input(), 1, COUNT, 0).expect("reply is well formed");
    assert_eq!(buf.input().get_str(TEXT), "HELLO");
    assert_eq!(buf.input().get_u32(COUNT), 1);

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}

#[test]
fn sequential_duplicates_get_identical_replies() {
    const COPIES: usize = 5;
    let fx = fixture(&[]);
    let message = request(1, CLIENT_ID_ASSIGN);

    let mut replies = Vec::new();
    for _ in 0..COPIES {
        fx.socket.send(&message).expect("send");
        replies.push(receive(&fx.socket).expect("reply"));
    }
    assert_eq!(replies.len(), COPIES);
    assert!(replies.iter().all(|reply| reply == &replies[0]));
    assert_eq!(fx.runs.load(Ordering::SeqCst), 1);

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}

#[test]
fn older_sequence_is_dropped_silently() {
    let fx = fixture(&[]);
    fx.socket.send(&request(5, CLIENT_ID_ASSIGN)).expect("send");
    let reply = receive(&fx.socket).expect("reply");
    let client_id = Header::decode(&reply).expect("header").client_id;

    fx.socket.send(&request(6, client_id)).expect("send");
    receive(&fx.socket).expect("reply to 6");
    fx.socket.send(&request(4, client_id)).expect("send");
    assert!(receive(&fx.socket).is_none());
    assert_eq!(fx.runs.load(Ordering::SeqCst), 2);

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}

#[test]
fn version_mismatch_reply_is_parseable() {
    let fx = fixture(&[]);
    let mut message = request(1, CLIENT_ID_ASSIGN);
    let header = Header {
        version: pack_version(7, 3),
        ..Header::decode(&message).expect("header")
    };
    header.encode(&mut message);
    fx.socket.send(&message).expect("send");

    let reply = receive(&fx.socket).expect("reply");
    let mut buf = ParamBuffer::new(512);
    buf.input_mut().load(&reply).unwrap();
    let parsed = Header::check(buf.input().message()).expect("well formed");
    assert_eq!(parsed.sequence, 1);
    assert_eq!(
        Status::from_code(buf.input().get_u32(PARAM_STATUS)),
        Status::VersionMismatch
    );
    assert_eq!(fx.runs.load(Ordering::SeqCst), 0);

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}

#[test]
fn malformed_datagram_gets_no_reply() {
    let fx = fixture(&[]);
    let mut message = request(1, CLIENT_ID_ASSIGN);
    message[0] ^= 0xFF;
    fx.socket.send(&message).expect("send");
    assert!(receive(&fx.socket).is_none());
    // The worker keeps serving.
    fx.socket.send(&request(1, CLIENT_ID_ASSIGN)).expect("send");
    assert!(receive(&fx.socket).is_some());

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}

#[test]
fn client_counts_one_execution_per_call() {
    const KEY: &[u8] = b"datagram key";
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);
    let server = Server::builder(ServerConfig {
        workers: 2,
        poll_interval: Duration::from_millis(20),
        ..ServerConfig::default()
    })
    .procedure(COUNT, move |_: &mut Call<'_>| {
        seen.fetch_add(1, Ordering::SeqCst);
        Status::Ok
    })
    .key(KeyRecord::new(KEY))
    .build()
    .expect("server");
    let bound = DatagramSocket::bind("127.0.0.1:0").expect("bind");
    let addr = bound.local_addr().expect("addr");
    let handle = server.serve_datagram(bound).expect("serve");

    let mut client = Client::new(
        DatagramTransport::connect(addr).expect("connect"),
        ClientConfig::default().with_key(KEY),
    );
    for _ in 0..10 {
        client.lock().expect("lock").exec(COUNT, 0).expect("call");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 10);

    handle.shutdown();
    handle.join().expect("join");
}

#[test]
fn unsigned_datagrams_cannot_stall_an_authenticated_client() {
    const KEY: &[u8] = b"datagram key";
    let fx = fixture(&[KEY]);
    let mut client = Client::new(
        DatagramTransport::connect(fx.addr).expect("connect"),
        ClientConfig::default().with_key(KEY),
    );
    client.lock().expect("lock").exec(COUNT, 0).expect("first call");
    let (client_id, session) = (client.client_id(), client.session());

    // Someone else claims the client's id with a far-ahead sequence,
    // once bare and once with the session id copied in.
    for session in [0, session] {
        fx.socket
            .send(&request_in(session, 1_000_000, client_id))
            .expect("send");
        let reply = receive(&fx.socket).expect("refusal");
        let mut buf = ParamBuffer::new(512);
        buf.input_mut().load(&reply).unwrap();
        assert_eq!(
            Status::from_code(buf.input().get_u32(PARAM_STATUS)),
            Status::NotAuthenticated
        );
    }

    client.lock().expect("lock").exec(COUNT, 0).expect("second call");
    assert_eq!(fx.runs.load(Ordering::SeqCst), 2);

    fx.handle.shutdown();
    fx.handle.join().expect("join");
}
