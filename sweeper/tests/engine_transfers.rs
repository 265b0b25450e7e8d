mod common;

use std::time::Duration;

use common::*;
use sweeper::ledger::{SubmitFailure, TxIntent};
use sweeper::{Amount, BotEvent, EngineConfig, EventChannel, OperationKind, TransferAmount};

#[tokio::test(start_paused = true)]
async fn fixed_amount_is_capped_at_spendable_balance() {
    let ledger = FakeLedger::new(Amount::from_units(9));
    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();
    engine.set_transfer_amount(TransferAmount::Fixed(Amount::from_units(10)));

    let mut transferred = engine.subscribe().only(EventChannel::Transferred);
    engine.start_transfer_only().unwrap();

    match next_on(&mut transferred, EventChannel::Transferred, Duration::from_secs(5)).await {
        Some(BotEvent::Transferred { amount, destination, .. }) => {
            assert_eq!(amount.to_string(), "7.0000000");
            assert_eq!(destination, destination_address());
        }
        other => panic!("expected a transferred event, got {:?}", other),
    }
    assert_eq!(ledger.native_balance(), Amount::from_units(2));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn nothing_is_sent_while_balance_is_below_reserve() {
    let ledger = FakeLedger::new("1.5".parse().unwrap());
    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();

    let mut events = engine.subscribe();
    engine.start_transfer_only().unwrap();

    assert!(wait_until(Duration::from_secs(2), || engine.stats().transfer_cycles >= 3).await);
    assert_eq!(engine.available_native_balance().await.unwrap(), Amount::ZERO);
    assert!(ledger.submissions().is_empty());
    assert_eq!(engine.stats().transfers_launched, 0);

    let logs = log_lines(&drain(&mut events));
    assert!(logs
        .iter()
        .any(|l| l.ends_with("Insufficient balance for transfer")));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn max_amount_sweeps_everything_above_reserve_once() {
    let ledger = FakeLedger::new("12.5".parse().unwrap());
    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();
    assert_eq!(engine.transfer_amount(), TransferAmount::Max);

    engine.start_transfer_only().unwrap();

    assert!(wait_until(Duration::from_secs(2), || engine.stats().transfers_succeeded == 1).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let payments: Vec<Amount> = ledger
        .submissions()
        .iter()
        .filter_map(|tx| match &tx.intent {
            TxIntent::Payment { amount, .. } => Some(*amount),
            _ => None,
        })
        .collect();
    assert_eq!(payments, vec!["10.5".parse().unwrap()]);
    assert_eq!(ledger.native_balance(), Amount::from_units(2));
    assert_eq!(engine.stats().transfers_launched, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_transfer_is_relaunched_on_a_later_cycle() {
    let ledger = FakeLedger::new(Amount::from_units(5));
    ledger.script_submissions(vec![
        Err(SubmitFailure::BadSequence),
        Err(SubmitFailure::BadSequence),
    ]);

    let config = EngineConfig {
        max_attempts: 2,
        ..test_config()
    };
    let engine = engine(&ledger, config);
    engine.set_destination(&destination_address()).unwrap();
    let mut transferred = engine.subscribe().only(EventChannel::Transferred);
    engine.start_transfer_only().unwrap();

    assert!(next_on(&mut transferred, EventChannel::Transferred, Duration::from_secs(5))
        .await
        .is_some());

    let stats = engine.stats();
    assert_eq!(stats.transfers_exhausted, 1);
    assert_eq!(stats.transfers_succeeded, 1);
    assert!(stats.transfers_launched >= 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_transfers_may_overlap_across_cycles() {
    let ledger = FakeLedger::new(Amount::from_units(100));
    ledger.set_submit_delay(Duration::from_millis(450));

    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();
    engine.set_transfer_amount(TransferAmount::Fixed(Amount::from_units(1)));
    engine.start_transfer_only().unwrap();

    // Each launch gets its own key, so the tracker does not serialize them
    assert!(wait_until(Duration::from_secs(1), || engine.in_flight(OperationKind::Transfer) >= 2).await);

    engine.stop();
    assert!(wait_until(Duration::from_secs(5), || engine.in_flight(OperationKind::Transfer) == 0).await);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transfer_bids_follow_p99() {
    let ledger = FakeLedger::new(Amount::from_units(3));
    ledger.set_fee_stats(Some(sweeper::ledger::FeeStats {
        p95: 60_000,
        p99: 70_000,
    }));

    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();
    engine.start_transfer_only().unwrap();

    assert!(wait_until(Duration::from_secs(2), || engine.stats().transfers_succeeded == 1).await);
    assert_eq!(engine.fee(OperationKind::Transfer), 210_000);
    assert_eq!(engine.fee(OperationKind::Claim), 150_000);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_balance_fetch_is_reported_and_the_loop_keeps_polling() {
    let ledger = FakeLedger::new(Amount::from_units(6));
    ledger.fail_account_loads("horizon down");

    let engine = engine(&ledger, test_config());
    engine.set_destination(&destination_address()).unwrap();
    let mut events = engine.subscribe();
    engine.start_transfer_only().unwrap();

    assert!(wait_until(Duration::from_secs(1), || engine.stats().transfer_cycles >= 3).await);
    assert!(engine.is_transferring());
    assert!(ledger.submissions().is_empty());
    assert_eq!(engine.stats().transfers_launched, 0);

    let seen = drain(&mut events);
    let logs = log_lines(&seen);
    assert!(logs
        .iter()
        .any(|l| l.contains("[TransferLoop] Error in transfer loop") && l.contains("horizon down")));
    assert!(seen.iter().any(|e| matches!(
        e,
        BotEvent::Error(message) if message.starts_with("Account error:")
    )));

    let cycles = engine.stats().transfer_cycles;
    ledger.clear_failures();
    match next_on(&mut events, EventChannel::Transferred, Duration::from_secs(5)).await {
        Some(BotEvent::Transferred { amount, .. }) => assert_eq!(amount, Amount::from_units(4)),
        other => panic!("expected a transferred event, got {:?}", other),
    }
    assert!(engine.stats().transfer_cycles > cycles);

    engine.shutdown().await;
}
