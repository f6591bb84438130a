use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use loopback_bench::response::SMALL_BODY;
use loopback_bench::{canned_response, fixed_body, ConnPool, FakeConn, FAKE_ADDR};

// Long enough for a misbehaving read to return, short enough to keep the suite fast
const STILL_BLOCKED: Duration = Duration::from_millis(100);
const WAKE_TIMEOUT: Duration = Duration::from_secs(5);

fn small_response() -> Vec<u8> {
    canned_response(SMALL_BODY)
}

/// Reads until the zero-length read that ends a cycle.
fn drain_cycle(mut conn: &FakeConn, chunk: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    let mut reads = 0;
    loop {
        let n = conn.read(&mut buf).unwrap();
        if n == 0 {
            return (out, reads);
        }
        reads += 1;
        out.extend_from_slice(&buf[..n]);
    }
}

/// Spawns a reader on `conn` and reports whether it stays blocked until a
/// write arrives.
fn assert_read_waits_for_write(conn: &FakeConn, expected_first: &[u8]) {
    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|s| {
        s.spawn(move || {
            let mut reader = conn;
            let mut buf = vec![0u8; 4096];
            let n = reader.read(&mut buf).unwrap();
            done_tx.send(buf[..n].to_vec()).unwrap();
        });

        assert!(
            done_rx.recv_timeout(STILL_BLOCKED).is_err(),
            "read returned before any write"
        );

        let mut writer = conn;
        writer.write_all(b"GET /aaa/bbb HTTP/1.1\r\n\r\n").unwrap();
        let got = done_rx
            .recv_timeout(WAKE_TIMEOUT)
            .expect("read did not wake up after write");
        assert_eq!(got, expected_first);
    });
}

#[cfg(test)]
mod cycle_tests {
    use super::*;

    #[test]
    fn test_small_response_round_trip() {
        let pool = ConnPool::new();
        let response = small_response();
        let mut conn = pool.acquire(response.clone());

        conn.write_all(b"GET /aaa/bbb HTTP/1.1\r\nHost: foobar1.com\r\n\r\n").unwrap();
        let (out, reads) = drain_cycle(&conn, 4096);

        assert_eq!(out, response);
        assert_eq!(reads, 1);
        assert_eq!(conn.cursor(), 0, "zero-length read resets the cursor");
    }

    #[test]
    fn test_round_trip_any_buffer_size() {
        let pool = ConnPool::new();
        let response = canned_response(&fixed_body(1000));

        for chunk in [1, 2, 3, 7, 64, 999, 1000, 1063, 1064, 1065, 8192] {
            let conn = pool.acquire(response.clone());
            (&conn).write_all(b"x").unwrap();

            let (out, reads) = drain_cycle(&conn, chunk);
            assert_eq!(out, response, "buffer size {chunk}");
            assert_eq!(reads, response.len().div_ceil(chunk), "buffer size {chunk}");
        }
    }

    #[test]
    fn test_big_response_read_count() {
        let pool = ConnPool::new();
        let response = fixed_body(1024 * 1024);
        let conn = pool.acquire(response.clone());
        (&conn).write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let (out, reads) = drain_cycle(&conn, 4096);
        assert_eq!(reads, 256);
        assert_eq!(out.len(), response.len());
        assert!(out == response);
    }

    #[test]
    fn test_cursor_stays_in_bounds() {
        let pool = ConnPool::new();
        let response = small_response();
        let mut conn = pool.acquire(response.clone());
        conn.write_all(b"x").unwrap();

        let mut buf = [0u8; 10];
        loop {
            let n = conn.read(&mut buf).unwrap();
            assert!(conn.cursor() <= response.len());
            if n == 0 {
                break;
            }
        }
    }

    #[test]
    fn test_write_reports_full_length() {
        let pool = ConnPool::new();
        let mut conn = pool.acquire(small_response());

        assert_eq!(conn.write(b"").unwrap(), 0);
        assert_eq!(conn.write(&[0u8; 12345]).unwrap(), 12345);
        conn.flush().unwrap();
        assert!(conn.has_pending_request());
    }

    #[test]
    fn test_repeated_writes_arm_once() {
        let pool = ConnPool::new();
        let response = small_response();
        let conn = pool.acquire(response.clone());

        (&conn).write_all(b"first").unwrap();
        (&conn).write_all(b"second").unwrap();
        let (out, _) = drain_cycle(&conn, 4096);
        assert_eq!(out, response);
        assert!(!conn.has_pending_request());

        assert_read_waits_for_write(&conn, &response);
    }

    #[test]
    fn test_empty_buffer_read_does_not_block() {
        let pool = ConnPool::new();
        let mut conn = pool.acquire(small_response());

        assert_eq!(conn.read(&mut []).unwrap(), 0);
        assert_eq!(conn.cursor(), 0);
    }

    #[test]
    fn test_empty_response_cycle() {
        let pool = ConnPool::new();
        let conn = pool.acquire(Vec::<u8>::new());

        (&conn).write_all(b"x").unwrap();
        let (out, reads) = drain_cycle(&conn, 16);
        assert!(out.is_empty());
        assert_eq!(reads, 0);
    }

    #[test]
    fn test_addresses_are_fixed() {
        let pool = ConnPool::new();
        let conn = pool.acquire(small_response());

        assert_eq!(conn.local_addr(), FAKE_ADDR);
        assert_eq!(conn.peer_addr(), FAKE_ADDR);
        assert_eq!(FAKE_ADDR.to_string(), "1.2.3.4:8765");
    }
}

#[cfg(test)]
mod blocking_tests {
    use super::*;

    #[test]
    fn test_fresh_read_blocks_until_write() {
        let pool = ConnPool::new();
        let response = small_response();
        let conn = pool.acquire(response.clone());

        assert_read_waits_for_write(&conn, &response);
    }

    #[test]
    fn test_read_after_cycle_end_blocks_again() {
        let pool = ConnPool::new();
        let response = small_response();
        let conn = pool.acquire(response.clone());

        for _ in 0..3 {
            (&conn).write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
            let (out, _) = drain_cycle(&conn, 4096);
            assert_eq!(out, response);
        }

        assert_read_waits_for_write(&conn, &response);
    }

    #[test]
    fn test_mid_cycle_read_does_not_block() {
        let pool = ConnPool::new();
        let response = small_response();
        let mut conn = pool.acquire(response.clone());
        conn.write_all(b"x").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).unwrap(), 8);
        // Armed cycle in progress: reads keep streaming without another write.
        assert_eq!(conn.read(&mut buf).unwrap(), 8);
        assert_eq!(conn.cursor(), 16);
    }

    #[test]
    fn test_close_resets_state_for_next_checkout() {
        let pool = ConnPool::new();
        let response = small_response();
        let mut conn = pool.acquire(response.clone());
        let id = conn.id();

        conn.write_all(b"x").unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).unwrap();
        conn.write_all(b"pending").unwrap();
        assert_eq!(conn.cursor(), 5);
        conn.close();

        let conn = pool.acquire(response.clone());
        assert_eq!(conn.id(), id);
        assert_eq!(conn.cursor(), 0);
        assert!(!conn.has_pending_request());
        assert_read_waits_for_write(&conn, &response);
    }
}
