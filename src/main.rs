//! Scripted two-replica editing session for the LogootSplit CRDT.
//!
//! This binary walks through a concurrent editing scenario end to end:
//! concurrent insertions, a deletion, a rename, and an operation from the
//! old epoch arriving late. Operations travel as JSON, the way a transport
//! layer would ship them.
//!
//! Run with: cargo run

use tracing::{info, Level};

use crdt_logootsplit::{Operation, RenamableList};

/// Ships an operation the way the network would: serialized, validated on
/// arrival, then applied.
fn deliver(to: &mut RenamableList, op: &Operation) {
    let payload = op.to_json();
    let parsed = Operation::from_json(&payload).expect("locally produced payloads are well-formed");
    let text_ops = to.apply(&parsed).expect("epoch is known");
    info!(
        replica = to.replica_number(),
        ?text_ops,
        content = to.as_str(),
        "applied remote operation"
    );
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    info!("Starting LogootSplit two-replica session...");

    let mut alice = RenamableList::new(1);
    let mut bob = RenamableList::new(2);

    // Alice types a sentence; Bob receives it.
    let hello = alice.insert(0, "Hello world").unwrap();
    deliver(&mut bob, &hello);

    // Concurrent edits at both ends.
    let from_alice = alice.insert(11, "!").unwrap();
    let from_bob = bob.insert(5, ",").unwrap();
    deliver(&mut bob, &from_alice);
    deliver(&mut alice, &from_bob);
    assert_eq!(alice.as_str(), bob.as_str());
    info!(content = alice.as_str(), "replicas converged");

    // Bob trims the greeting.
    let del = bob.delete(0, 4).unwrap();
    deliver(&mut alice, &del);

    // Bob keeps editing while Alice renames: Bob's operation is tagged with
    // the old epoch and still applies everywhere.
    let late = bob.insert(0, ">").unwrap();
    let rename = alice.rename().unwrap();
    deliver(&mut alice, &late);
    deliver(&mut bob, &rename);

    assert_eq!(alice.as_str(), bob.as_str());
    assert_eq!(alice.current_epoch(), bob.current_epoch());
    info!(
        content = alice.as_str(),
        epoch = ?alice.current_epoch(),
        "replicas converged after rename"
    );
}
