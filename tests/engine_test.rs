// Trade engine integration tests against scripted ledger and aggregator

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::TransactionError;

use swapseer::transaction_builder::fee_transfers;
use swapseer::types::FeeAsset;
use swapseer::{EngineState, RetryPolicy, SwapError, TradeMode, TradeRequest, TradeStage, WalletEvent};

use common::*;

fn buy(h: &Harness, amount: &str) -> TradeRequest {
    TradeRequest::new(TradeMode::Buy, Pubkey::new_unique(), amount, h.engine.settings())
}

#[tokio::test]
async fn test_slippage_over_maximum_is_rejected_before_quoting() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());

    let err = h
        .engine
        .submit_trade(buy(&h, "1").with_slippage_bps(10_001))
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::InvalidInput(_)));
    assert_eq!(h.aggregator.quote_count(), 0);
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_amount_above_balance_is_rejected_before_quoting() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());

    let err = h.engine.submit_trade(buy(&h, "10")).await.unwrap_err();

    match err {
        SwapError::InsufficientBalance { required, available } => {
            assert_eq!(required, 10 * SOL);
            assert_eq!(available, 5 * SOL);
        }
        other => panic!("expected InsufficientBalance, got {:?}", other),
    }
    assert_eq!(h.aggregator.quote_count(), 0);
    assert_eq!(h.ledger.send_count(), 0);
}

#[tokio::test]
async fn test_successful_buy() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.ledger.script_statuses(vec![None, confirmed()]);
    let mut events = h.engine.subscribe_events();

    let receipt = h.engine.submit_trade(buy(&h, "1")).await.unwrap();

    assert_eq!(h.aggregator.quote_count(), 1);
    assert_eq!(receipt.input_amount, SOL);
    assert_eq!(receipt.output_amount, 2 * SOL);
    assert_eq!(receipt.fee_amount, SOL / 100);
    assert_eq!(h.ledger.send_count(), 1);
    assert_eq!(h.engine.state(), EngineState::Connected);

    // The broadcast transaction pays exactly one fee, last
    let sent = h.ledger.sent.lock()[0].clone();
    assert_eq!(sent.signatures[0], receipt.signature);
    let fees = fee_transfers(&sent, &h.fee_receiver);
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].asset, FeeAsset::Native);
    assert_eq!(fees[0].amount_atomic, SOL / 100);
    assert_eq!(fees[0].instruction_index, sent.message.instructions().len() - 1);

    let mut stages = Vec::new();
    while let Ok(event) = events.try_recv() {
        stages.push(event.stage);
    }
    assert_eq!(
        stages,
        vec![
            TradeStage::Validated,
            TradeStage::Quoted,
            TradeStage::Built,
            TradeStage::Signed,
            TradeStage::Broadcast,
            TradeStage::Confirmed,
        ]
    );
}

#[tokio::test]
async fn test_successful_sell_charges_fee_in_token() {
    let ledger = MockLedger::new(SOL).with_token_balance(5_000_000);
    let h = harness(ledger, MockWallet::new());
    h.ledger.script_statuses(vec![confirmed()]);

    let request = TradeRequest::new(TradeMode::Sell, Pubkey::new_unique(), "2", h.engine.settings());
    let receipt = h.engine.submit_trade(request).await.unwrap();

    assert_eq!(receipt.input_amount, 2_000_000);
    assert_eq!(receipt.fee_amount, 20_000);
    let sent = h.ledger.sent.lock()[0].clone();
    let fees = fee_transfers(&sent, &h.fee_receiver);
    assert_eq!(fees.len(), 1);
    assert!(matches!(fees[0].asset, FeeAsset::Token { decimals: TOKEN_DECIMALS, .. }));
    assert_eq!(fees[0].amount_atomic, 20_000);
}

#[tokio::test]
async fn test_concurrent_submit_is_rejected() {
    let wallet = MockWallet::new().with_sign_delay(Duration::from_millis(200));
    let h = harness(MockLedger::new(5 * SOL), wallet);
    h.ledger.script_statuses(vec![confirmed()]);

    let engine = h.engine.clone();
    let first_request = buy(&h, "1");
    let first = tokio::spawn(async move { engine.submit_trade(first_request).await });

    let mut state = h.engine.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == EngineState::Trading))
        .await
        .unwrap()
        .unwrap();

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();
    assert!(matches!(err, SwapError::TradeInProgress));

    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.aggregator.quote_count(), 1);
    assert_eq!(h.ledger.send_count(), 1);
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_submit_during_validation_is_rejected_before_balance_read() {
    let ledger = MockLedger::new(5 * SOL).with_balance_delay(Duration::from_millis(100));
    let h = harness(ledger, MockWallet::new());
    h.ledger.script_statuses(vec![confirmed()]);

    let engine = h.engine.clone();
    let first_request = buy(&h, "1");
    let first = tokio::spawn(async move { engine.submit_trade(first_request).await });

    // The slot is taken before the first balance read returns
    let mut state = h.engine.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == EngineState::Trading))
        .await
        .unwrap()
        .unwrap();

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();
    assert!(matches!(err, SwapError::TradeInProgress));
    assert_eq!(h.ledger.balance_calls.load(Ordering::SeqCst), 1);

    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.aggregator.quote_count(), 1);
}

#[tokio::test]
async fn test_validation_failure_releases_trading_slot() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.ledger.script_statuses(vec![confirmed()]);

    let err = h.engine.submit_trade(buy(&h, "10")).await.unwrap_err();
    assert!(matches!(err, SwapError::InsufficientBalance { .. }));
    assert_eq!(h.engine.state(), EngineState::Connected);

    h.engine.submit_trade(buy(&h, "1")).await.unwrap();
}

#[tokio::test]
async fn test_second_trade_is_validated_against_post_trade_balance() {
    // The first buy leaves 5 - 3 - 0.03 fee = 1.97 SOL
    let ledger = MockLedger::new(5 * SOL).debiting(3 * SOL + 3 * SOL / 100);
    let h = harness(ledger, MockWallet::new());
    h.ledger.script_statuses(vec![confirmed()]);

    h.engine.submit_trade(buy(&h, "3")).await.unwrap();
    assert_eq!(h.aggregator.quote_count(), 1);

    let err = h.engine.submit_trade(buy(&h, "3")).await.unwrap_err();

    match err {
        SwapError::InsufficientBalance { required, available } => {
            assert_eq!(required, 3 * SOL);
            assert_eq!(available, 5 * SOL - 3 * SOL - 3 * SOL / 100);
        }
        other => panic!("expected InsufficientBalance, got {:?}", other),
    }
    assert_eq!(h.aggregator.quote_count(), 1);
    assert_eq!(h.ledger.send_count(), 1);
}

#[tokio::test]
async fn test_no_route_returns_to_connected_without_building() {
    // Signing would surface UserRejection instead
    let h = harness(MockLedger::new(5 * SOL), MockWallet::rejecting());
    h.aggregator.no_route.store(true, Ordering::SeqCst);

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    assert!(matches!(err, SwapError::NoRouteFound(_)));
    assert_eq!(h.aggregator.quote_count(), 1);
    assert_eq!(h.aggregator.builds.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.send_count(), 0);
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_expired_quote_is_not_built() {
    let h = harness_with(MockLedger::new(5 * SOL), MockWallet::new(), |builder| {
        builder.with_quote_ttl(Duration::ZERO)
    });

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    assert!(matches!(err, SwapError::QuoteExpired { .. }));
    assert_eq!(h.aggregator.builds.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.send_count(), 0);
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_transient_broadcast_failure_is_retried() {
    let ledger = MockLedger::new(5 * SOL).failing_sends(1);
    let h = harness_with(ledger, MockWallet::new(), |builder| {
        builder.with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
    });
    h.ledger.script_statuses(vec![confirmed()]);

    let receipt = h.engine.submit_trade(buy(&h, "1")).await.unwrap();

    assert_eq!(h.ledger.send_count(), 2);
    let sent = h.ledger.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signatures[0], receipt.signature);
}

#[tokio::test]
async fn test_unanswered_broadcast_keeps_signature() {
    let ledger = MockLedger::new(5 * SOL).failing_sends(usize::MAX);
    let h = harness(ledger, MockWallet::new());
    let mut events = h.engine.subscribe_events();

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    let signature = match &err {
        SwapError::NetworkTimeout {
            signature: Some(signature), ..
        } => *signature,
        other => panic!("expected NetworkTimeout with a signature, got {:?}", other),
    };
    assert_eq!(h.ledger.send_count(), 1);
    assert_eq!(h.engine.state(), EngineState::Connected);

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.stage, TradeStage::Failed);
    assert_eq!(last.signature, Some(signature.to_string()));
}

#[tokio::test]
async fn test_blockhash_expiry_is_terminal() {
    let ledger = MockLedger::new(5 * SOL).with_height_step(50);
    let h = harness(ledger, MockWallet::new());
    let mut events = h.engine.subscribe_events();

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    match &err {
        SwapError::TransactionExpired {
            last_valid_block_height, ..
        } => assert_eq!(*last_valid_block_height, LAST_VALID_BLOCK_HEIGHT),
        other => panic!("expected TransactionExpired, got {:?}", other),
    }
    // Never rebroadcast after expiry
    assert_eq!(h.ledger.send_count(), 1);
    assert_eq!(h.engine.state(), EngineState::Connected);

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.stage, TradeStage::Failed);
    assert_eq!(last.signature, err.signature().map(|s| s.to_string()));
}

#[tokio::test]
async fn test_on_chain_slippage_failure() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.ledger.script_statuses(vec![failed(TransactionError::InstructionError(
        1,
        InstructionError::Custom(6001),
    ))]);

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    assert!(matches!(err, SwapError::SlippageExceeded { .. }));
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_user_rejection_sends_nothing() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::rejecting());

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    assert!(matches!(err, SwapError::UserRejection));
    assert_eq!(h.ledger.send_count(), 0);
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_missing_swap_transaction_is_build_error() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.aggregator.omit_transaction.store(true, Ordering::SeqCst);

    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();

    assert!(matches!(err, SwapError::Build(_)));
    assert_eq!(h.ledger.send_count(), 0);
}

#[tokio::test]
async fn test_anti_mev_routes_through_relay() {
    let h = protected_harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.ledger.script_statuses(vec![confirmed()]);

    let request = buy(&h, "1").with_priority_fee(50_000_000);
    h.engine.submit_trade(request).await.unwrap();

    assert_eq!(h.relay.sends.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.send_count(), 0);
    // Clamped to the configured maximum
    assert_eq!(
        h.relay.last_tip.load(Ordering::SeqCst),
        h.engine.settings().max_priority_fee_atomic
    );
}

#[tokio::test]
async fn test_anti_mev_without_relay_is_invalid() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());

    let err = h
        .engine
        .submit_trade(buy(&h, "1").with_anti_mev(true))
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::InvalidInput(_)));
    assert_eq!(h.aggregator.quote_count(), 0);
}

#[tokio::test]
async fn test_authenticate() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());

    h.engine.authenticate(b"sign in to swapseer").await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Signed);

    let err = h.engine.authenticate(b"again").await.unwrap_err();
    assert!(matches!(err, SwapError::InvalidState(_)));
    assert_eq!(h.engine.state(), EngineState::Signed);
}

#[tokio::test]
async fn test_rejected_authentication_returns_to_connected() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::rejecting());

    let err = h.engine.authenticate(b"sign in").await.unwrap_err();

    assert!(matches!(err, SwapError::UserRejection));
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_disconnect() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    h.engine.refresh_balances(None).await.unwrap();
    let wallet = h.engine.wallet().unwrap();
    assert_eq!(h.engine.balances().cached_native(&wallet), Some(5 * SOL));

    h.engine.handle_wallet_event(WalletEvent::Disconnected);

    assert_eq!(h.engine.state(), EngineState::Disconnected);
    assert!(h.engine.balances().cached_native(&wallet).is_none());
    let err = h.engine.submit_trade(buy(&h, "1")).await.unwrap_err();
    assert!(matches!(err, SwapError::NotConnected));
    assert!(matches!(h.engine.refresh_balances(None).await, Err(SwapError::NotConnected)));
}

#[tokio::test]
async fn test_wallet_listener_applies_events() {
    let h = harness(MockLedger::new(5 * SOL), MockWallet::new());
    let (tx, rx) = swapseer::wallet::wallet_event_channel(4);
    let listener = h.engine.spawn_wallet_listener(rx);
    let mut state = h.engine.subscribe_state();

    tx.send(WalletEvent::Disconnected).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| *s == EngineState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    drop(tx);
    listener.await.unwrap();
}
