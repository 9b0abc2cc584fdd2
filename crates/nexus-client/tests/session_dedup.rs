//! Session-manager behavior over real TCP sockets: connection
//! deduplication, shared dial outcomes, and disconnect policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexus_client::{ClientConfig, DisconnectPolicy, SessionManager};
use nexus_object::{Address, DAttribute, DValue, NexusObject};
use nexus_transport::{TcpChannel, TcpTransport, Transport, TransportError};
use nexus_wire::{
    frame, BinReader, BinWriter, Downstream, FrameReader, ObjectId,
    ObjectSnapshot, Registry, Upstream, Value,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Binds a listener that counts accepted sockets and keeps each one
/// open, discarding whatever arrives.
async fn counting_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    (host, accepted)
}

/// Binds a listener that answers every `Subscribe` with a one-attribute
/// snapshot and ignores everything else.
async fn snapshot_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let registry = Registry::new();
                let mut frames = FrameReader::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    frames.feed(&buf[..n]);
                    while let Ok(Some(payload)) = frames.next_frame() {
                        let mut r = BinReader::new(&payload);
                        let Ok(message) = Upstream::read(&mut r, &registry)
                        else {
                            return;
                        };
                        if let Upstream::Subscribe { req_id, addr } = message {
                            let reply = Downstream::SubscribeResult {
                                req_id,
                                result: Ok(ObjectSnapshot {
                                    id: addr.id,
                                    attrs: vec![Some(Value::Int(0))],
                                }),
                            };
                            let mut w = BinWriter::new();
                            reply.write(&mut w, &registry).unwrap();
                            let framed = frame(&w.into_bytes()).unwrap();
                            if stream.write_all(&framed).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    host
}

#[derive(Default)]
struct Widget {
    value: DValue<i32>,
}

impl NexusObject for Widget {
    fn visit_attributes(&mut self, visit: &mut dyn FnMut(&mut dyn DAttribute)) {
        visit(&mut self.value);
    }
}

/// TCP with an artificial connect delay, to hold a dial in flight.
struct SlowTcp {
    delay: Duration,
}

impl Transport for SlowTcp {
    type Channel = TcpChannel;

    async fn connect(&self, host: &str) -> Result<TcpChannel, TransportError> {
        tokio::time::sleep(self.delay).await;
        TcpTransport.connect(host).await
    }
}

fn manager(policy: DisconnectPolicy) -> Arc<SessionManager<TcpTransport>> {
    Arc::new(SessionManager::with_config(
        TcpTransport,
        Arc::new(Registry::new()),
        ClientConfig {
            connect_timeout_secs: 5,
            disconnect_policy: policy,
        },
    ))
}

#[tokio::test]
async fn test_concurrent_requests_share_one_dial() {
    let (host, accepted) = counting_server().await;
    let manager = manager(DisconnectPolicy::Never);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let host = host.clone();
        handles.push(tokio::spawn(async move {
            manager.with_connection(&host).await
        }));
    }

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap().expect("dial should succeed"));
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1, "exactly one socket");
    assert_eq!(manager.connection_count(), 1);
    for connection in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], connection));
    }
}

#[tokio::test]
async fn test_failed_dial_fails_every_waiter() {
    // Nothing listens on port 9; connection refused for everyone.
    let manager = manager(DisconnectPolicy::Never);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.with_connection("127.0.0.1:9").await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }
    assert_eq!(manager.connection_count(), 0);
}

#[tokio::test]
async fn test_sequential_requests_reuse_connection() {
    let (host, accepted) = counting_server().await;
    let manager = manager(DisconnectPolicy::Never);

    let first = manager.with_connection(&host).await.unwrap();
    let second = manager.with_connection(&host).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_immediate_release_closes_connection() {
    let (host, _) = counting_server().await;
    let manager = manager(DisconnectPolicy::Immediate);

    let connection = manager.with_connection(&host).await.unwrap();
    manager.release(&host);

    assert!(connection.is_closed());
    assert_eq!(manager.connection_count(), 0);
}

#[tokio::test]
async fn test_never_release_keeps_connection() {
    let (host, _) = counting_server().await;
    let manager = manager(DisconnectPolicy::Never);

    let connection = manager.with_connection(&host).await.unwrap();
    manager.release(&host);

    assert!(!connection.is_closed());
    assert_eq!(manager.connection_count(), 1);
}

#[tokio::test]
async fn test_debounced_release_survives_quick_reuse() {
    let (host, accepted) = counting_server().await;
    let manager = manager(DisconnectPolicy::Debounced { linger_secs: 60 });

    let first = manager.with_connection(&host).await.unwrap();
    manager.release(&host);

    // Reuse within the linger window rides the same connection.
    let second = manager.with_connection(&host).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_debounced_release_closes_after_linger() {
    let (host, _) = counting_server().await;
    let manager = manager(DisconnectPolicy::Debounced { linger_secs: 0 });

    let connection = manager.with_connection(&host).await.unwrap();
    manager.release(&host);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(connection.is_closed());
    assert_eq!(manager.connection_count(), 0);
}

#[tokio::test]
async fn test_cancelled_winner_does_not_strand_waiters() {
    let (host, _) = counting_server().await;
    let manager = Arc::new(SessionManager::with_config(
        SlowTcp {
            delay: Duration::from_millis(300),
        },
        Arc::new(Registry::new()),
        ClientConfig {
            connect_timeout_secs: 5,
            disconnect_policy: DisconnectPolicy::Never,
        },
    ));

    let winner = {
        let manager = manager.clone();
        let host = host.clone();
        tokio::spawn(async move { manager.with_connection(&host).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    winner.abort();

    // The dial itself survives the cancelled caller; a later request
    // for the same host must still complete.
    let second =
        tokio::time::timeout(Duration::from_secs(3), manager.with_connection(&host))
            .await
            .expect("request completed despite the cancelled dialer");
    assert!(second.is_ok());
    assert_eq!(manager.connection_count(), 1);
}

#[tokio::test]
async fn test_connection_stays_up_while_subscriptions_remain() {
    let host = snapshot_server().await;
    let manager = manager(DisconnectPolicy::Immediate);

    let connection = manager.with_connection(&host).await.unwrap();
    let first = connection
        .subscribe(&Address::<Widget>::new(host.clone(), ObjectId(1)))
        .await
        .unwrap();
    let second = connection
        .subscribe(&Address::<Widget>::new(host.clone(), ObjectId(2)))
        .await
        .unwrap();
    assert_eq!(connection.subscription_count(), 2);

    first.unsubscribe().unwrap();
    assert!(!connection.is_closed(), "one subscription still live");
    assert_eq!(manager.connection_count(), 1);

    second.unsubscribe().unwrap();
    assert!(connection.is_closed(), "last unsubscribe applies the policy");
    assert_eq!(manager.connection_count(), 0);
}

#[tokio::test]
async fn test_release_keeps_a_subscribed_connection() {
    let host = snapshot_server().await;
    let manager = manager(DisconnectPolicy::Immediate);

    let connection = manager.with_connection(&host).await.unwrap();
    let handle = connection
        .subscribe(&Address::<Widget>::new(host.clone(), ObjectId(1)))
        .await
        .unwrap();

    manager.release(&host);
    assert!(!connection.is_closed());
    assert_eq!(manager.connection_count(), 1);
    drop(handle);
}

#[tokio::test]
async fn test_closed_connection_is_replaced_on_next_request() {
    let (host, accepted) = counting_server().await;
    let manager = manager(DisconnectPolicy::Never);

    let first = manager.with_connection(&host).await.unwrap();
    first.shutdown();

    let second = manager.with_connection(&host).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}
