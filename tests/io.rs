//! Record I/O: exact reads over fragmented delivery, early peer close,
//! the negate round-trip, and mid-stream rehandshake transparency.

mod common;

use std::sync::Arc;

use common::{client_context, init_logging, server_context, spawn_server, test_pki, TIMEOUT};
use tls6::{Connection, MemoryClientCache, MemoryServerCache};

#[test]
fn read_exact_reassembles_byte_sized_fragments() {
    init_logging();
    let pki = test_pki();
    let server_ctx = server_context(&pki, Arc::new(MemoryServerCache::new(64)));
    let client_ctx = client_context(&pki, Arc::new(MemoryClientCache::new()));

    let expected: Vec<u8> = (0u8..32).collect();
    let payload = expected.clone();
    let (addr, server) = spawn_server(server_ctx, move |mut conn| {
        // One record per byte: the worst-case fragmentation the reader
        // must reassemble.
        for byte in payload {
            conn.write_exact(&[byte]).unwrap();
        }
        conn.close();
    });

    let mut conn = Connection::connect(&client_ctx, addr, Some("localhost"), TIMEOUT).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(conn.read_exact(&mut buf).unwrap(), 32);
    assert_eq!(&buf[..], &expected[..]);
    conn.close();
    server.join().unwrap();
}

#[test]
fn read_exact_reports_peer_close_not_a_partial_count() {
    init_logging();
    let pki = test_pki();
    let server_ctx = server_context(&pki, Arc::new(MemoryServerCache::new(64)));
    let client_ctx = client_context(&pki, Arc::new(MemoryClientCache::new()));

    let (addr, server) = spawn_server(server_ctx, |mut conn| {
        conn.write_exact(b"short").unwrap();
        conn.close();
    });

    let mut conn = Connection::connect(&client_ctx, addr, Some("localhost"), TIMEOUT).unwrap();
    let mut buf = [0u8; 16];
    // Five bytes arrive, then the orderly shutdown: the caller sees the
    // close outcome, never a count below the requested length.
    assert_eq!(conn.read_exact(&mut buf).unwrap(), 0);
    conn.close();
    server.join().unwrap();
}

#[test]
fn negate_roundtrip_with_clean_close_caches_the_session() {
    init_logging();
    let pki = test_pki();
    let server_ctx = server_context(&pki, Arc::new(MemoryServerCache::new(64)));
    let client_cache = Arc::new(MemoryClientCache::new());
    let client_ctx = client_context(&pki, client_cache.clone());

    let (addr, server) = spawn_server(server_ctx, |mut conn| {
        let mut buf = [0u8; 16];
        assert_eq!(conn.read_exact(&mut buf).unwrap(), 16);
        for byte in &mut buf {
            *byte = byte.wrapping_neg();
        }
        conn.write_exact(&buf).unwrap();
        conn.close();
    });

    let mut conn = Connection::connect(&client_ctx, addr, Some("localhost"), TIMEOUT).unwrap();
    let outgoing: Vec<u8> = (0u8..16).collect();
    assert_eq!(conn.write_exact(&outgoing).unwrap(), 16);

    let mut reply = [0u8; 16];
    assert_eq!(conn.read_exact(&mut reply).unwrap(), 16);
    let expected: Vec<u8> = (0u8..16).map(|b| b.wrapping_neg()).collect();
    assert_eq!(&reply[..], &expected[..]);

    let summary = conn.close();
    assert!(summary.clean);
    assert!(summary.session_cached);
    assert!(client_cache.contains(&addr));
    server.join().unwrap();
}

#[test]
fn server_rehandshake_is_transparent_to_a_reading_client() {
    init_logging();
    let pki = test_pki();
    let server_ctx = server_context(&pki, Arc::new(MemoryServerCache::new(64)));
    let client_ctx = client_context(&pki, Arc::new(MemoryClientCache::new()));

    let (addr, server) = spawn_server(server_ctx, |mut conn| {
        let mut buf = [0u8; 4];
        assert_eq!(conn.read_exact(&mut buf).unwrap(), 4);
        conn.rehandshake().unwrap();
        // Data sent after the rehandshake must reach the peer intact.
        conn.write_exact(b"pong").unwrap();
        conn.close();
    });

    let mut conn = Connection::connect(&client_ctx, addr, Some("localhost"), TIMEOUT).unwrap();
    conn.write_exact(b"ping").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(conn.read_exact(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"pong");
    conn.close();
    server.join().unwrap();
}
