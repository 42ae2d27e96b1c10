use std::sync::Arc;
use std::time::{Duration, Instant};

use cramrpc_auth::{
    AuthConfig, AuthError, ClientState, CramClient, CramServer, HashAlgorithm, KeyRecord,
    SessionState, Verified,
};
use cramrpc_wire::ids::{
    PARAM_AUTH_CLIENT_RESPONSE, PARAM_AUTH_SERVER_RESPONSE, PARAM_PROCEDURE, PARAM_STATUS,
    PROC_AUTHENTICATE,
};
use cramrpc_wire::Region;
use proptest::prelude::*;

const KEY: &[u8] = b"correct horse battery staple";

struct Pair {
    server: CramServer,
    client: CramClient,
    session: u32,
}

fn region() -> Region {
    Region::new(0, 4096)
}

fn server_with(config: AuthConfig, keys: &[&[u8]]) -> CramServer {
    let server = CramServer::new(config).expect("server");
    for key in keys {
        server.add_key(KeyRecord::new(key));
    }
    server
}

/// Messages 1 and 2: begin and challenge.
fn begin(server: CramServer, client_key: &[u8]) -> Pair {
    let mut client = CramClient::new(client_key);
    client.begin().expect("begin");
    let mut challenge = region();
    let session = server.begin(1, &mut challenge).expect("server begin");
    client
        .accept_challenge(session, &challenge)
        .expect("accept challenge");
    Pair {
        server,
        client,
        session,
    }
}

fn signed_request(client: &mut CramClient, payload: &str) -> Region {
    let mut request = region();
    request.set_u32(PARAM_PROCEDURE, PROC_AUTHENTICATE).unwrap();
    request.set_str(0x2000_0007, payload).unwrap();
    client.sign(&mut request).expect("client sign");
    request
}

fn flip_bit(message: &Region, record_id: u32, bit: usize) -> Region {
    let record = message.find(record_id).expect("record");
    let range = record.data_range();
    let mut bytes = message.params().to_vec();
    let index = range.start + (bit / 8) % range.len();
    bytes[index] ^= 1 << (bit % 8);
    let mut mutated = region();
    mutated.load(&bytes).unwrap();
    mutated
}

/// Messages 3 and 4; returns the server's signed response.
fn exchange(pair: &mut Pair, sequence: u32) -> (Region, Region) {
    let request = signed_request(&mut pair.client, "hello");
    let handle = pair.server.session(pair.session).expect("session");
    let mut session = handle.lock().unwrap();
    let verified = pair
        .server
        .check(&mut session, sequence, &request)
        .expect("server check");
    assert_eq!(verified, Verified::Fresh);

    let mut response = region();
    response.set_u32(PARAM_STATUS, 0).unwrap();
    pair.server
        .sign(&mut session, &mut response)
        .expect("server sign");
    (request, response)
}

#[test]
fn four_message_handshake_authenticates_both_sides() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    assert_eq!(pair.client.state(), ClientState::Ready);

    let (_, response) = exchange(&mut pair, 2);
    pair.client.verify(&response).expect("client verify");

    assert_eq!(pair.client.state(), ClientState::Authenticated);
    let handle = pair.server.session(pair.session).unwrap();
    let session = handle.lock().unwrap();
    assert_eq!(session.state(), SessionState::Authenticate);
    assert!(session.is_authenticated());
}

#[test]
fn authentication_rides_every_request() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    for sequence in 2..6 {
        let (_, response) = exchange(&mut pair, sequence);
        pair.client.verify(&response).expect("client verify");
    }
    assert_eq!(pair.client.state(), ClientState::Authenticated);
}

#[test]
fn sha512_handshake() {
    let config = AuthConfig {
        hash: HashAlgorithm::HmacSha512,
        challenge_size: 64,
        ..AuthConfig::default()
    };
    let mut pair = begin(server_with(config, &[KEY]), KEY);
    assert_eq!(pair.client.hash(), HashAlgorithm::HmacSha512);
    let (request, response) = exchange(&mut pair, 2);
    assert_eq!(request.get(PARAM_AUTH_CLIENT_RESPONSE).unwrap().len(), 64);
    pair.client.verify(&response).expect("client verify");
}

#[test]
fn wrong_key_fails_session() {
    let mut pair = begin(server_with(AuthConfig::default(), &[b"other".as_slice()]), KEY);
    let request = signed_request(&mut pair.client, "hello");
    let handle = pair.server.session(pair.session).unwrap();
    let mut session = handle.lock().unwrap();

    let err = pair.server.check(&mut session, 2, &request).unwrap_err();
    assert!(matches!(err, AuthError::NoMatchingKey));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(matches!(
        pair.server.check(&mut session, 3, &request),
        Err(AuthError::Failed)
    ));
}

#[test]
fn first_matching_key_is_bound() {
    let server = CramServer::new(AuthConfig::default()).unwrap();
    server.add_key(KeyRecord::new(b"alice").with_user_data(Arc::new("alice")));
    server.add_key(KeyRecord::new(KEY).with_user_data(Arc::new("bob")));
    let mut pair = begin(server, KEY);
    exchange(&mut pair, 2);

    let handle = pair.server.session(pair.session).unwrap();
    let session = handle.lock().unwrap();
    let owner = session
        .key()
        .and_then(|key| key.user_data())
        .and_then(|data| data.downcast_ref::<&'static str>())
        .copied();
    assert_eq!(owner, Some("bob"));
}

#[test]
fn retried_request_verifies_against_previous_challenge() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    let (request, response) = exchange(&mut pair, 2);

    let handle = pair.server.session(pair.session).unwrap();
    {
        let mut session = handle.lock().unwrap();
        let verified = pair.server.check(&mut session, 2, &request).unwrap();
        assert_eq!(verified, Verified::Retry);
        assert_eq!(session.state(), SessionState::Authenticate);
    }

    // The original response still verifies on the client.
    pair.client.verify(&response).expect("client verify");
    let (_, response) = exchange(&mut pair, 3);
    pair.client.verify(&response).expect("client verify");
}

#[test]
fn tampered_retry_leaves_session_usable() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    let (request, response) = exchange(&mut pair, 2);
    pair.client.verify(&response).expect("client verify");

    let handle = pair.server.session(pair.session).unwrap();
    {
        let mut session = handle.lock().unwrap();
        pair.server
            .check_retry(&mut session, 2, &request)
            .expect("genuine retry");
        let forged = flip_bit(&request, PARAM_AUTH_CLIENT_RESPONSE, 3);
        assert!(matches!(
            pair.server.check_retry(&mut session, 2, &forged),
            Err(AuthError::SignatureMismatch)
        ));
        // Sequence 3 has not been answered yet.
        assert!(pair.server.check_retry(&mut session, 3, &request).is_err());
        assert_eq!(session.state(), SessionState::Authenticate);
    }

    let (_, response) = exchange(&mut pair, 3);
    pair.client.verify(&response).expect("client verify");
}

#[test]
fn old_request_cannot_be_replayed_into_a_new_exchange() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    let (first, response) = exchange(&mut pair, 2);
    pair.client.verify(&response).unwrap();
    let (_, response) = exchange(&mut pair, 3);
    pair.client.verify(&response).unwrap();

    // Sequence 4 is new, so the current challenge applies and the
    // captured request signed against the first challenge must fail.
    let handle = pair.server.session(pair.session).unwrap();
    let mut session = handle.lock().unwrap();
    assert!(matches!(
        pair.server.check(&mut session, 4, &first),
        Err(AuthError::SignatureMismatch)
    ));
}

#[test]
fn client_rejects_response_with_wrong_challenge_size() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    signed_request(&mut pair.client, "x");
    let mut response = region();
    response
        .set_bytes(cramrpc_wire::ids::PARAM_AUTH_SERVER_CHALLENGE, &[0u8; 9])
        .unwrap();
    assert!(matches!(
        pair.client.verify(&response),
        Err(AuthError::ChallengeSize { .. })
    ));
    assert!(pair.client.is_failed());
    assert!(pair.client.sign(&mut region()).is_err());
}

#[test]
fn accept_challenge_rejects_unknown_hash() {
    let mut client = CramClient::new(KEY);
    client.begin().unwrap();
    let mut challenge = region();
    challenge
        .set_u32(cramrpc_wire::ids::PARAM_AUTH_HASH_TYPE, 77)
        .unwrap();
    challenge
        .set_bytes(cramrpc_wire::ids::PARAM_AUTH_SERVER_CHALLENGE, &[1u8; 16])
        .unwrap();
    assert!(matches!(
        client.accept_challenge(5, &challenge),
        Err(AuthError::UnsupportedHash(77))
    ));
    assert_eq!(client.state(), ClientState::Failed);
}

#[test]
fn reaper_evicts_unauthenticated_sessions_first() {
    let config = AuthConfig {
        auth_timeout: Duration::from_secs(1),
        timeout: Duration::from_secs(60),
        ..AuthConfig::default()
    };
    let server = server_with(config, &[KEY]);
    let pending = server.begin(1, &mut region()).unwrap();
    let mut pair = begin(server, KEY);
    exchange(&mut pair, 2);

    let evicted = pair.server.reap(Instant::now() + Duration::from_secs(5));
    assert_eq!(evicted, vec![pending]);
    assert!(pair.server.session(pair.session).is_some());

    let evicted = pair.server.reap(Instant::now() + Duration::from_secs(120));
    assert_eq!(evicted, vec![pair.session]);
}

#[test]
fn logout_removes_session() {
    let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
    exchange(&mut pair, 2);
    assert!(pair.server.logout(pair.session));
    assert!(pair.server.session(pair.session).is_none());
    assert!(!pair.server.logout(pair.session));
}

proptest! {
    /// Any single-bit change in the client response fails the session.
    #[test]
    fn client_response_bit_flip_never_authenticates(bit in 0usize..256) {
        let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
        let request = signed_request(&mut pair.client, "hello");
        let mutated = flip_bit(&request, PARAM_AUTH_CLIENT_RESPONSE, bit);

        let handle = pair.server.session(pair.session).unwrap();
        let mut session = handle.lock().unwrap();
        prop_assert!(pair.server.check(&mut session, 2, &mutated).is_err());
        prop_assert_eq!(session.state(), SessionState::Failed);
    }

    /// Any single-bit change in the server response fails the client.
    #[test]
    fn server_response_bit_flip_never_authenticates(bit in 0usize..256) {
        let mut pair = begin(server_with(AuthConfig::default(), &[KEY]), KEY);
        let (_, response) = exchange(&mut pair, 2);
        let mutated = flip_bit(&response, PARAM_AUTH_SERVER_RESPONSE, bit);

        prop_assert!(pair.client.verify(&mutated).is_err());
        prop_assert_eq!(pair.client.state(), ClientState::Failed);
    }
}
