//! Full-stack round trips: a real server over TCP, a client session
//! manager, typed proxies, event propagation, and service calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use std::sync::OnceLock;

use nexus::prelude::*;

const BOARD_SERVICE: TypeCode = TypeCode(40);

struct Scoreboard {
    title: DValue<String>,
    scores: DMap<String, i32>,
    control: DService,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self {
            title: DValue::default(),
            scores: DMap::default(),
            control: DService::new(BOARD_SERVICE),
        }
    }
}

impl NexusObject for Scoreboard {
    fn visit_attributes(&mut self, visit: &mut dyn FnMut(&mut dyn DAttribute)) {
        visit(&mut self.title);
        visit(&mut self.scores);
        visit(&mut self.control);
    }
}

type BoardSlot = Arc<OnceLock<Arc<Mutex<Scoreboard>>>>;

/// Method 0: record a score of `points` for `name` on the hosted
/// board, returning the new total. Mutating through the published
/// handle is what lets subscribers see the change. The slot is filled
/// once the board is published.
fn board_services(slot: BoardSlot) -> ServiceDispatcher {
    let mut services = ServiceDispatcher::new();
    services.register(BOARD_SERVICE, move |method, args| {
        let slot = slot.clone();
        async move {
            let Some(board) = slot.get().cloned() else {
                return Err("board not published yet".to_string());
            };
            match method {
                0 => {
                    let mut args = args.into_iter();
                    let (Some(Value::String(Some(name))), Some(Value::Int(points))) =
                        (args.next(), args.next())
                    else {
                        return Err("expected (string, int)".to_string());
                    };
                    let mut board = board.lock().unwrap();
                    let total = board.scores.get(&name).unwrap_or(0) + points;
                    board.scores.put(name, total);
                    Ok(Value::Int(total))
                }
                other => Err(format!("unknown method {other}")),
            }
        }
    });
    services
}

struct Rig {
    host: String,
    board_id: ObjectId,
    board: Arc<Mutex<Scoreboard>>,
    sessions: Arc<SessionManager<TcpTransport>>,
}

impl Rig {
    async fn start() -> Self {
        let registry = Arc::new(Registry::new());
        let listener = TcpListenerTransport::bind("127.0.0.1:0")
            .await
            .expect("bind");

        let slot: BoardSlot = Arc::new(OnceLock::new());
        let server = NexusServer::<TcpListenerTransport>::builder()
            .registry(registry.clone())
            .services(board_services(slot.clone()))
            .with_listener(listener);
        let (board_id, board) = server.space().publish(Scoreboard::default());
        let _ = slot.set(board.clone());

        let host = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let sessions = Arc::new(SessionManager::with_config(
            TcpTransport,
            registry,
            ClientConfig {
                connect_timeout_secs: 5,
                disconnect_policy: DisconnectPolicy::Never,
            },
        ));

        Self {
            host,
            board_id,
            board,
            sessions,
        }
    }

    fn address(&self) -> Address<Scoreboard> {
        Address::new(self.host.clone(), self.board_id)
    }
}

async fn wait_until(what: &str, f: impl Fn() -> bool) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_subscribe_transfers_current_state() {
    let rig = Rig::start().await;
    {
        let mut board = rig.board.lock().unwrap();
        board.title.set("finals".into());
        board.scores.put("ada".into(), 10);
    }

    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    handle.with(|board| {
        assert_eq!(board.title.get(), "finals");
        assert_eq!(board.scores.get(&"ada".into()), Some(10));
    });
}

#[tokio::test]
async fn test_server_mutation_reaches_proxy_listeners() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    let observed = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    {
        let observed = observed.clone();
        handle.with(|board| {
            board.title.on_change(move |new, old| {
                observed.lock().unwrap().push((new.clone(), old.clone()));
            });
        });
    }

    rig.board.lock().unwrap().title.set("semis".into());

    let snapshot = observed.clone();
    wait_until("title change", move || !snapshot.lock().unwrap().is_empty())
        .await;

    assert_eq!(
        observed.lock().unwrap()[0],
        ("semis".to_string(), String::new())
    );
    handle.with(|board| assert_eq!(board.title.get(), "semis"));
}

#[tokio::test]
async fn test_map_events_propagate_put_and_remove() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    {
        let mut board = rig.board.lock().unwrap();
        board.scores.put("lin".into(), 4);
        board.scores.put("lin".into(), 9);
    }
    let h = handle.clone();
    wait_until("put events", move || {
        h.with(|board| board.scores.get(&"lin".into()) == Some(9))
    })
    .await;

    rig.board.lock().unwrap().scores.remove(&"lin".into());
    let h = handle.clone();
    wait_until("remove event", move || {
        h.with(|board| !board.scores.contains_key(&"lin".into()))
    })
    .await;
}

#[tokio::test]
async fn test_two_clients_see_the_same_events() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    // Separate manager simulates a second process.
    let other_sessions = Arc::new(SessionManager::new(
        TcpTransport,
        Arc::new(Registry::new()),
    ));
    let other = other_sessions.with_connection(&rig.host).await.unwrap();

    let a = connection.subscribe(&rig.address()).await.unwrap();
    let b = other.subscribe(&rig.address()).await.unwrap();

    rig.board.lock().unwrap().title.set("shared".into());

    for handle in [a, b] {
        let h = handle.clone();
        wait_until("title on both proxies", move || {
            h.with(|board| board.title.get() == "shared")
        })
        .await;
    }
}

#[tokio::test]
async fn test_unsubscribed_proxy_goes_stale() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    let stale = handle.clone();
    handle.unsubscribe().unwrap();

    rig.board.lock().unwrap().title.set("after".into());
    tokio::time::sleep(Duration::from_millis(100)).await;

    stale.with(|board| assert_eq!(board.title.get(), ""));
}

#[tokio::test]
async fn test_subscribe_unknown_object_is_rejected() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();

    let bogus = Address::<Scoreboard>::new(rig.host.clone(), ObjectId(999));
    let err = connection.subscribe(&bogus).await.unwrap_err();
    assert!(err.to_string().contains("999"));
}

#[tokio::test]
async fn test_local_proxy_mutation_stays_local() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = fired.clone();
        handle.with(|board| {
            board.title.on_change(move |_, _| {
                fired.store(true, Ordering::SeqCst);
            });
            board.title.set("local only".into());
        });
    }
    assert!(fired.load(Ordering::SeqCst), "local listeners still fire");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        rig.board.lock().unwrap().title.get(),
        "",
        "proxy writes must not reach the server"
    );
}

#[tokio::test]
async fn test_service_call_round_trip_through_proxy() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    let pending = handle
        .with(|board| {
            board
                .control
                .invoke(0, vec![Value::string("ada"), Value::Int(5)])
        })
        .unwrap();
    assert_eq!(pending.outcome().await, Ok(Value::Int(5)));

    // The handler mutated the hosted board, so the event comes back
    // around to this same proxy.
    let h = handle.clone();
    wait_until("score applied to proxy", move || {
        h.with(|board| board.scores.get(&"ada".into()) == Some(5))
    })
    .await;

    let pending = handle
        .with(|board| {
            board
                .control
                .invoke(0, vec![Value::string("ada"), Value::Int(3)])
        })
        .unwrap();
    assert_eq!(pending.outcome().await, Ok(Value::Int(8)));
}

#[tokio::test]
async fn test_service_call_failures_come_back_as_errors() {
    let rig = Rig::start().await;
    let connection = rig.sessions.with_connection(&rig.host).await.unwrap();
    let handle = connection.subscribe(&rig.address()).await.unwrap();

    let pending = handle
        .with(|board| board.control.invoke(9, Vec::new()))
        .unwrap();
    assert_eq!(pending.outcome().await, Err("unknown method 9".into()));

    let pending = handle
        .with(|board| board.control.invoke(0, vec![Value::Bool(true)]))
        .unwrap();
    assert!(pending.outcome().await.is_err());
}
