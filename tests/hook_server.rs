use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use ulid::Ulid;

use slotcap::auth::TokenAuth;
use slotcap::config::EventLimitConfig;
use slotcap::engine::CapacityEngine;
use slotcap::hooks::LifecycleHooks;
use slotcap::server;
use slotcap::store::WalStore;

const TOKEN: &str = "hook-secret";
const SLOT: i64 = 1_767_261_600_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<WalStore>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotcap_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalStore::open(&dir.join("bookings.wal")).unwrap());

    let config = EventLimitConfig::new([8], 10, "number_of_children").unwrap();
    let engine = Arc::new(CapacityEngine::new(Arc::new(config), store.clone()));
    let hooks = Arc::new(LifecycleHooks::new(engine));
    let auth = Arc::new(TokenAuth::new(Some(TOKEN.into())));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let hooks = hooks.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let _ = server::process_connection(socket, hooks, auth).await;
            });
        }
    });

    (addr, store)
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
        let reply = self.lines.next_line().await.unwrap().expect("connection closed");
        serde_json::from_str(&reply).unwrap()
    }

    async fn send(&mut self, mut request: Value) -> Value {
        request["token"] = json!(TOKEN);
        self.send_raw(&request.to_string()).await
    }
}

fn post_update(children: &str) -> Value {
    json!({
        "op": "post_update",
        "booking": {
            "event_id": 8,
            "event_kind": "group",
            "slot_start": SLOT,
            "fields": { "parent_name": "Sam", "number_of_children": children },
        },
    })
}

fn pre_create(event_id: u64) -> Value {
    json!({ "op": "pre_create", "event_kind": "group", "event_id": event_id, "slot_start": SLOT })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn fills_slot_then_rejects_and_cancels() {
    let (addr, store) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.send(pre_create(8)).await;
    assert_eq!(resp["decision"], "admit");

    let a = client.send(post_update("6")).await;
    assert_eq!(a["status"], 200);
    assert_eq!(a["decision"], "keep");

    let b = client.send(post_update("5")).await;
    assert_eq!(b["status"], 400);
    assert_eq!(b["decision"], "cancel");
    assert_eq!(b["title"], "Booking Unavailable");
    assert_eq!(
        b["message"],
        "Sorry, this event has reached the maximum number of children (10)."
    );
    assert_eq!(b["ceiling"], 10);
    assert_eq!(b["remaining"], 4);
    assert_eq!(b["attempted"], 5);

    let total = client
        .send(json!({ "op": "slot_total", "event_id": 8, "slot_start": SLOT }))
        .await;
    assert_eq!(total["total"], 6);
    assert_eq!(total["limited"], true);

    let c = client.send(post_update("4")).await;
    assert_eq!(c["decision"], "keep");

    let resp = client.send(pre_create(8)).await;
    assert_eq!(resp["status"], 400);
    assert_eq!(resp["decision"], "reject");
    assert!(resp.get("remaining").is_none());

    // Unlimited events on the same slot are untouched
    let resp = client.send(pre_create(9)).await;
    assert_eq!(resp["decision"], "admit");

    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn cancelling_frees_capacity() {
    let (addr, _store) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let full = client.send(post_update("10")).await;
    assert_eq!(full["decision"], "keep");
    assert_eq!(client.send(pre_create(8)).await["decision"], "reject");

    let id = full["id"].as_str().unwrap();
    let resp = client
        .send(json!({ "op": "sync_status", "id": id, "status": "cancelled" }))
        .await;
    assert_eq!(resp["status"], 200);

    assert_eq!(client.send(pre_create(8)).await["decision"], "admit");
}

#[tokio::test]
async fn concurrent_updates_never_overbook() {
    let (addr, _store) = start_test_server().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client.send(post_update("3")).await
        }));
    }

    let mut kept = 0;
    for h in handles {
        if h.await.unwrap()["decision"] == "keep" {
            kept += 1;
        }
    }
    assert_eq!(kept, 3);

    let mut client = Client::connect(addr).await;
    let total = client
        .send(json!({ "op": "slot_total", "event_id": 8, "slot_start": SLOT }))
        .await;
    assert_eq!(total["total"], 9);
}

#[tokio::test]
async fn rejects_bad_token_and_malformed_lines() {
    let (addr, _store) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.send_raw(&pre_create(8).to_string()).await;
    assert_eq!(resp["status"], 401);

    let mut wrong = pre_create(8);
    wrong["token"] = json!("nope");
    assert_eq!(client.send_raw(&wrong.to_string()).await["status"], 401);

    let resp = client.send_raw("{\"op\":\"launch_rockets\"}").await;
    assert_eq!(resp["status"], 400);

    let resp = client.send(json!({ "op": "post_update", "booking": { "event_id": 8 } })).await;
    assert_eq!(resp["status"], 400);

    // The connection survives bad input
    assert_eq!(client.send(pre_create(8)).await["status"], 200);
}
