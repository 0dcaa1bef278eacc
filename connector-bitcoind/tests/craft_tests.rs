//! Crafting orchestrator tests against the in-memory node

mod common;

use bitcoin::consensus::encode::serialize;
use common::{crafter, crafter_config, destination, init_test_logging, node_with_outputs, outpoint, sats};
use connector_bitcoind::client::NodeClient;
use connector_bitcoind::coin_select::InsufficientFunds;
use connector_bitcoind::craft::{CraftError, CraftStage, Deadline, TransactionCrafter};
use connector_bitcoind::mock::{MockNodeClient, NodeCall, MOCK_ADDRESSES};
use connector_common::events::{ConnectorEvent, EventBus};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_empty_cache_fails_without_locking() {
    init_test_logging();
    let node = Arc::new(MockNodeClient::new());
    let crafter = crafter(&node);

    let err = crafter.craft(1, sats(10_000), &destination()).unwrap_err();

    match err {
        CraftError::InsufficientFunds(e) => {
            assert_eq!(e, InsufficientFunds { needed: 10_000, available: 0 })
        }
        other => panic!("expected insufficient funds, got {:?}", other),
    }
    assert!(node.lock_requests().is_empty());
    assert_eq!(
        node.calls(),
        vec![
            NodeCall::LockUnspent { unlock: true, outpoints: vec![] },
            NodeCall::ListUnspent { min_conf: 1, max_conf: i32::MAX as u32 },
        ]
    );
}

#[test]
fn test_craft_with_change_output() {
    init_test_logging();
    let node = node_with_outputs(&[10_000, 20_000]);
    let crafter = crafter(&node);

    let crafted = crafter.craft(1, sats(5_000), &destination()).unwrap();

    // One input: fee = 4 * (10 + 148 + 2 * 34)
    assert_eq!(crafted.fee, sats(904));
    assert_eq!(crafted.change, sats(10_000 - 5_000 - 904));
    assert_eq!(crafted.inputs, vec![outpoint(1, 0)]);

    let outputs = &crafted.transaction.output;
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].value, 5_000);
    assert_eq!(outputs[0].script_pubkey, destination().script_pubkey());
    assert_eq!(outputs[1].value, crafted.change.to_sat());

    assert_eq!(crafted.txid, crafted.transaction.txid());
    assert_eq!(crafted.raw, serialize(&crafted.transaction));
    assert!(node.is_locked(&outpoint(1, 0)));
    assert!(node
        .calls()
        .contains(&NodeCall::GetNewAddress { account: String::new() }));
    assert!(node.calls().contains(&NodeCall::CreateRawTransaction {
        inputs: vec![outpoint(1, 0)],
        outputs: vec![
            (common::DESTINATION.to_string(), 5_000),
            (MOCK_ADDRESSES[0].to_string(), crafted.change.to_sat()),
        ],
        lock_time: 0,
    }));
}

#[test]
fn test_inputs_leave_the_cache() {
    let node = node_with_outputs(&[10_000, 20_000]);
    let crafter = crafter(&node);

    crafter.craft(1, sats(5_000), &destination()).unwrap();

    let remaining: Vec<_> = crafter.cache().snapshot().into_iter().map(|u| u.outpoint).collect();
    assert_eq!(remaining, vec![outpoint(2, 0)]);
    assert!(crafter.cache().is_reserved(&outpoint(1, 0)));
}

#[test]
fn test_dust_change_is_folded_into_fee() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    // change would be 10_000 - 8_800 - 904 = 296
    let crafted = crafter.craft(1, sats(8_800), &destination()).unwrap();

    assert_eq!(crafted.change, sats(0));
    assert_eq!(crafted.fee, sats(904 + 296));
    assert_eq!(crafted.transaction.output.len(), 1);
    assert!(!node
        .calls()
        .iter()
        .any(|call| matches!(call, NodeCall::GetNewAddress { .. })));
}

#[test]
fn test_zero_dust_threshold_keeps_small_change() {
    let node = node_with_outputs(&[10_000]);
    let mut config = crafter_config();
    config.dust_threshold = 0;
    let crafter = TransactionCrafter::new(Arc::clone(&node), config);

    let crafted = crafter.craft(1, sats(8_800), &destination()).unwrap();

    assert_eq!(crafted.change, sats(296));
    assert_eq!(crafted.fee, sats(904));
    assert_eq!(crafted.transaction.output.len(), 2);
}

#[test]
fn test_exact_cover_has_no_change_output() {
    let node = node_with_outputs(&[5_904]);
    let crafter = crafter(&node);

    let crafted = crafter.craft(1, sats(5_000), &destination()).unwrap();

    assert_eq!(crafted.change, sats(0));
    assert_eq!(crafted.fee, sats(904));
    assert_eq!(crafted.transaction.output.len(), 1);
}

#[test]
fn test_lock_failure_on_second_of_three() {
    init_test_logging();
    let node = node_with_outputs(&[1_000, 1_000, 1_000]);
    node.fail_lock_on(outpoint(2, 0));
    let crafter = crafter(&node);

    let err = crafter.craft(0, sats(2_500), &destination()).unwrap_err();

    match err {
        CraftError::Lock { outpoint: failed, .. } => assert_eq!(failed, outpoint(2, 0)),
        other => panic!("expected lock error, got {:?}", other),
    }
    assert_eq!(node.lock_requests(), vec![outpoint(1, 0), outpoint(2, 0)]);
    assert!(node.is_locked(&outpoint(1, 0)));
    assert!(!node.is_locked(&outpoint(3, 0)));
    assert_eq!(crafter.cache().len(), 3);
    assert_eq!(crafter.cache().reserved_count(), 0);
}

#[test]
fn test_next_craft_sweeps_leftover_locks() {
    let node = node_with_outputs(&[1_000, 1_000, 1_000]);
    node.fail_lock_on(outpoint(3, 0));
    let crafter = crafter(&node);

    assert!(crafter.craft(0, sats(2_500), &destination()).is_err());
    assert_eq!(node.locked_count(), 2);

    // Two inputs suffice now, the leftover locks are released first
    let crafted = crafter.craft(0, sats(1_500), &destination()).unwrap();
    assert_eq!(crafted.inputs, vec![outpoint(1, 0), outpoint(2, 0)]);
}

#[test]
fn test_failed_assembly_leaves_cache_untouched() {
    let node = node_with_outputs(&[10_000, 20_000]);
    let crafter = crafter(&node);
    crafter.sync().unwrap();
    let before = crafter.cache().snapshot();

    node.set_fail_create(true);
    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    assert!(matches!(
        err,
        CraftError::NodeQuery { stage: CraftStage::Assemble, .. }
    ));
    assert_eq!(crafter.cache().snapshot(), before);
    assert_eq!(crafter.cache().reserved_count(), 0);
}

#[test]
fn test_failed_change_address_is_node_error() {
    let node = node_with_outputs(&[10_000]);
    node.set_fail_new_address(true);
    let crafter = crafter(&node);

    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    assert!(matches!(
        err,
        CraftError::NodeQuery { stage: CraftStage::ChangeAddress, .. }
    ));
    assert_eq!(crafter.cache().len(), 1);
}

#[test]
fn test_failed_sync_is_node_error() {
    let node = node_with_outputs(&[10_000]);
    node.set_fail_list_unspent(true);
    let crafter = crafter(&node);

    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    assert!(matches!(
        err,
        CraftError::NodeQuery { stage: CraftStage::SyncUnspent, .. }
    ));
    assert!(node.lock_requests().is_empty());
}

#[test]
fn test_sync_twice_gives_identical_snapshot() {
    let node = node_with_outputs(&[3_000, 1_000, 2_000]);
    node.add_output(outpoint(9, 1), 4_000, 12);
    let crafter = crafter(&node);

    crafter.sync().unwrap();
    let first = crafter.cache().snapshot();
    crafter.sync().unwrap();
    let second = crafter.cache().snapshot();

    assert_eq!(first, second);
    assert_eq!(first[0].outpoint, outpoint(9, 1));
}

#[test]
fn test_unconfirmed_outputs_are_not_spent() {
    let node = Arc::new(
        MockNodeClient::new()
            .with_output(outpoint(1, 0), 50_000, 0)
            .with_output(outpoint(2, 0), 1_000, 3),
    );
    let crafter = crafter(&node);

    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    match err {
        CraftError::InsufficientFunds(e) => assert_eq!(e.available, 1_000),
        other => panic!("expected insufficient funds, got {:?}", other),
    }
}

#[test]
fn test_reserved_outputs_are_not_offered_after_resync() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    let first = crafter.craft(1, sats(5_000), &destination()).unwrap();
    assert!(crafter.cache().is_empty());

    // The next craft unlocks everything and resyncs, the node lists the
    // output again because the first transaction was never broadcast.
    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();
    assert!(matches!(err, CraftError::InsufficientFunds(_)));
    assert_eq!(node.lock_requests(), first.inputs);
}

#[test]
fn test_broadcast_prunes_reservations() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    let crafted = crafter.craft(1, sats(5_000), &destination()).unwrap();
    node.send_raw_transaction(&crafted.raw).unwrap();
    node.add_output(outpoint(2, 0), 20_000, 6);

    let next = crafter.craft(1, sats(5_000), &destination()).unwrap();

    assert_eq!(next.inputs, vec![outpoint(2, 0)]);
    assert!(!crafter.cache().is_reserved(&outpoint(1, 0)));
    assert_eq!(crafter.cache().reserved_count(), 1);
}

#[test]
fn test_sync_between_crafts_keeps_reservations() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    let first = crafter.craft(1, sats(5_000), &destination()).unwrap();
    // The spent input is still locked at the node, so it is not listed
    crafter.sync().unwrap();
    assert!(crafter.cache().is_reserved(&first.inputs[0]));

    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    assert!(matches!(err, CraftError::InsufficientFunds(_)));
    assert_eq!(node.lock_requests(), first.inputs);
}

#[test]
fn test_estimate_between_crafts_keeps_reservations() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    let first = crafter.craft(1, sats(5_000), &destination()).unwrap();
    assert!(crafter.estimate_fee(1, sats(5_000)).is_err());
    assert!(crafter.cache().is_reserved(&first.inputs[0]));

    let err = crafter.craft(1, sats(5_000), &destination()).unwrap_err();

    assert!(matches!(err, CraftError::InsufficientFunds(_)));
    assert_eq!(node.lock_requests(), first.inputs);
}

#[test]
fn test_release_all_unlocks_and_forgets_reservations() {
    let node = node_with_outputs(&[10_000, 20_000]);
    let crafter = crafter(&node);
    crafter.craft(1, sats(5_000), &destination()).unwrap();
    assert_eq!(node.locked_count(), 1);

    crafter.release_all().unwrap();

    assert_eq!(node.locked_count(), 0);
    assert!(crafter.cache().is_empty());
    assert_eq!(crafter.cache().reserved_count(), 0);

    crafter.sync().unwrap();
    assert_eq!(crafter.cache().len(), 2);
}

#[test]
fn test_estimate_fee_locks_nothing() {
    let node = node_with_outputs(&[10_000, 20_000]);
    let crafter = crafter(&node);

    let estimate = crafter.estimate_fee(1, sats(5_000)).unwrap();

    assert_eq!(estimate.fee, sats(904));
    assert_eq!(estimate.inputs, 1);
    assert!(node.lock_requests().is_empty());
    assert_eq!(crafter.cache().len(), 2);
}

#[test]
fn test_expired_deadline_issues_no_node_calls() {
    let node = node_with_outputs(&[10_000]);
    let crafter = crafter(&node);

    let err = crafter
        .craft_with_deadline(1, sats(5_000), &destination(), Deadline::after(Duration::ZERO))
        .unwrap_err();

    assert!(matches!(
        err,
        CraftError::Timeout { stage: CraftStage::UnlockOutputs }
    ));
    assert!(node.calls().is_empty());
}

#[test]
fn test_deadline_expires_between_node_calls() {
    let node = Arc::new(
        MockNodeClient::new()
            .with_output(outpoint(1, 0), 10_000, 6)
            .with_latency(Duration::from_millis(100)),
    );
    let crafter = crafter(&node);

    let err = crafter
        .craft_with_deadline(
            1,
            sats(5_000),
            &destination(),
            Deadline::after(Duration::from_millis(150)),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        CraftError::Timeout { stage: CraftStage::LockOutputs }
    ));
    assert!(node.lock_requests().is_empty());
}

#[test]
fn test_waiting_for_crafting_lock_times_out() {
    init_test_logging();
    let node = Arc::new(
        MockNodeClient::new()
            .with_output(outpoint(1, 0), 10_000, 6)
            .with_output(outpoint(2, 0), 10_000, 6)
            .with_latency(Duration::from_millis(200)),
    );
    let crafter = Arc::new(crafter(&node));

    let busy = {
        let crafter = Arc::clone(&crafter);
        thread::spawn(move || crafter.craft(1, sats(5_000), &destination()))
    };
    thread::sleep(Duration::from_millis(100));

    let err = crafter
        .craft_with_deadline(
            1,
            sats(5_000),
            &destination(),
            Deadline::after(Duration::from_millis(50)),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        CraftError::Timeout { stage: CraftStage::AcquireLock }
    ));
    assert!(busy.join().unwrap().is_ok());
}

#[test]
fn test_concurrent_crafts_never_share_inputs() {
    init_test_logging();
    let node = Arc::new(MockNodeClient::new().with_latency(Duration::from_millis(1)));
    for i in 0..4u8 {
        node.add_output(outpoint(i + 1, 0), 10_000, 6);
    }
    let crafter = Arc::new(crafter(&node));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let crafter = Arc::clone(&crafter);
            thread::spawn(move || crafter.craft(1, sats(5_000), &destination()))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut seen = HashSet::new();
    let mut crafted = 0;
    for result in results {
        match result {
            Ok(tx) => {
                crafted += 1;
                for input in tx.inputs {
                    assert!(seen.insert(input), "input {} spent twice", input);
                }
            }
            Err(CraftError::InsufficientFunds(_)) => {}
            Err(other) => panic!("unexpected craft error: {:?}", other),
        }
    }
    assert_eq!(crafted, 4);
    assert_eq!(seen.len(), 4);
}

#[test]
fn test_events_are_published() {
    let node = node_with_outputs(&[10_000]);
    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe_all();
    let crafter = crafter(&node).with_event_bus(Arc::clone(&bus));

    let crafted = crafter.craft(1, sats(5_000), &destination()).unwrap();

    let received: Vec<ConnectorEvent> = events.try_iter().collect();
    let topics: Vec<&str> = received.iter().map(ConnectorEvent::topic).collect();
    assert_eq!(
        topics,
        vec!["unspent_synced", "inputs_selected", "inputs_locked", "transaction_crafted"]
    );
    assert_eq!(
        received.last(),
        Some(&ConnectorEvent::TransactionCrafted {
            txid: crafted.txid.to_string(),
            fee_amount: 904,
            change_amount: 10_000 - 5_000 - 904,
        })
    );
}
