//! Minimal round trip on one node: subscribe, send, observe delivery.
//!
//! Run a second copy of this binary to see cross-process delivery: the
//! first instance becomes the broadcaster, the rest join as peers.

use std::time::Duration;

use crier::{Node, NodeOptions, Payload};

fn main() {
    let node = Node::new();
    node.configure(NodeOptions::new().id(format!("demo-{}", std::process::id())));

    node.connect("ping", |payload: &Payload| {
        let sender = payload
            .get("sender")
            .and_then(|value| value.as_str())
            .unwrap_or("?");
        println!("ping from {sender}: {payload:?}");
    });

    println!("listening for pings (broadcaster: {})", node.is_server());

    let mut payload = Payload::new();
    payload.insert("n".to_string(), serde_json::json!(1));
    if !node.send("ping", payload).unwrap_or(false) {
        eprintln!("no broadcaster acknowledged the ping");
    }

    std::thread::sleep(Duration::from_secs(3));
    node.stop();
}
