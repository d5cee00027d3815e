use flowqr::{
    models::{
        common::{BillingResult, PurchaseState, ResponseCode, UserMessage},
        purchase::{LaunchOutcome, ProcessOutcome, PurchaseOrigin},
    },
    provider::sandbox::PurchaseScript,
};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::common::{
    connect_ready, drain, eventually, expect_message, harness, mount_backend, pending,
    purchased, Harness, MONTHLY_PLAN_ID, YEARLY_PLAN_ID,
};

/// Token of the only purchase the sandbox has recorded
fn only_token(h: &Harness) -> String {
    let purchases = h.provider.purchases();
    assert_eq!(purchases.len(), 1);
    purchases[0].purchase_token.clone()
}

#[tokio::test]
async fn test_buy_verifies_and_acknowledges() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    connect_ready(&h).await;
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(YEARLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::SubscriptionActivated).await;

    let token = only_token(&h);
    assert!(eventually(|| h.state.coordinator.purchase_state(&token) == Some(PurchaseState::Acknowledged)).await);

    let stats = h.provider.stats();
    assert_eq!(stats.launches.len(), 1);
    assert_eq!(stats.launches[0].base_plan_tag, "yearly");
    assert_eq!(stats.acknowledge_attempts, vec![token]);
}

#[tokio::test]
async fn test_buy_unknown_plan_refreshes_catalog_without_launch() {
    let h = harness().await;
    connect_ready(&h).await;
    assert!(eventually(|| h.provider.stats().catalog_queries >= 1).await);
    let queries_before = h.provider.stats().catalog_queries;
    let mut messages = h.state.ui.subscribe();

    let outcome = h
        .state
        .coordinator
        .initiate(&"prodX|tokA|planA".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(outcome, LaunchOutcome::NotReady);
    expect_message(&mut messages, UserMessage::ProductDetailsNotLoaded).await;
    assert!(eventually(|| h.provider.stats().catalog_queries > queries_before).await);
    assert!(h.provider.stats().launches.is_empty());
}

#[tokio::test]
async fn test_backend_failure_leaves_verification_failed_until_restore() {
    let h = harness().await;
    mount_backend(&h.backend, 500).await;
    connect_ready(&h).await;
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::VerificationFailed).await;

    let token = only_token(&h);
    assert_eq!(
        h.state.coordinator.purchase_state(&token),
        Some(PurchaseState::VerificationFailed)
    );
    assert!(h.provider.stats().acknowledge_attempts.is_empty());

    // Backend recovers; the next restore pass picks the purchase up again
    h.backend.reset().await;
    mount_backend(&h.backend, 200).await;

    let summary = h.state.coordinator.restore().await.unwrap();

    assert_eq!(summary.examined, 1);
    assert_eq!(summary.acknowledged, 1);
    assert_eq!(
        h.state.coordinator.purchase_state(&token),
        Some(PurchaseState::Acknowledged)
    );
    assert_eq!(h.provider.stats().acknowledge_attempts, vec![token]);
}

#[tokio::test]
async fn test_already_owned_triggers_restore() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    connect_ready(&h).await;
    let queries_before = h.provider.stats().purchase_queries;

    h.provider.insert_purchase(purchased("owned-elsewhere"));
    h.provider.script_next_purchase(PurchaseScript::AlreadyOwned);
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();

    assert!(eventually(|| h.provider.stats().purchase_queries > queries_before).await);
    assert!(eventually(|| {
        h.state.coordinator.purchase_state("owned-elsewhere") == Some(PurchaseState::Acknowledged)
    })
    .await);
    assert!(drain(&mut messages)
        .iter()
        .all(|m| !matches!(m, UserMessage::PurchaseError(_))));
}

#[tokio::test]
async fn test_pending_payment_completes_later() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    connect_ready(&h).await;
    h.provider.script_next_purchase(PurchaseScript::Pending);
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::PaymentPending).await;

    let token = only_token(&h);
    assert!(eventually(|| h.state.coordinator.purchase_state(&token) == Some(PurchaseState::Pending)).await);
    assert!(h.backend.received_requests().await.unwrap().is_empty());

    assert!(h.provider.complete_pending(&token));
    expect_message(&mut messages, UserMessage::SubscriptionActivated).await;
    assert!(eventually(|| h.state.coordinator.purchase_state(&token) == Some(PurchaseState::Acknowledged)).await);
}

#[tokio::test]
async fn test_user_cancel_is_signalled_without_state() {
    let h = harness().await;
    connect_ready(&h).await;
    h.provider.script_next_purchase(PurchaseScript::Cancel);
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::PurchaseCanceled).await;

    assert!(h.state.coordinator.purchases().is_empty());
}

#[tokio::test]
async fn test_provider_error_is_surfaced_verbatim() {
    let h = harness().await;
    connect_ready(&h).await;
    h.provider.script_next_purchase(PurchaseScript::Fail(BillingResult::new(
        ResponseCode::ItemUnavailable,
        "Item unavailable in your country",
    )));
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();

    expect_message(
        &mut messages,
        UserMessage::PurchaseError("Item unavailable in your country".to_string()),
    )
    .await;
}

#[tokio::test]
async fn test_failed_acknowledgment_is_retried_by_restore() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    connect_ready(&h).await;
    h.provider.fail_acknowledgments(Some(BillingResult::new(
        ResponseCode::ServiceUnavailable,
        "try later",
    )));
    let mut messages = h.state.ui.subscribe();

    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::AcknowledgeFailed("try later".to_string())).await;

    let token = only_token(&h);
    assert!(eventually(|| h.state.coordinator.purchase_state(&token) == Some(PurchaseState::Verified)).await);

    h.provider.fail_acknowledgments(None);
    let summary = h.state.coordinator.restore().await.unwrap();

    assert_eq!(summary.acknowledged, 1);
    assert_eq!(
        h.state.coordinator.purchase_state(&token),
        Some(PurchaseState::Acknowledged)
    );
    assert_eq!(h.provider.stats().acknowledge_attempts.len(), 2);
}

#[tokio::test]
async fn test_acknowledgment_never_repeats_after_success() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    let token = "token-ack-once";
    h.provider.insert_purchase(purchased(token));

    let first = h.state.coordinator.restore().await.unwrap();
    assert_eq!(first.acknowledged, 1);

    h.state.coordinator.restore().await.unwrap();

    // A stale event still claiming the purchase is unacknowledged
    h.state
        .coordinator
        .on_purchases_updated(BillingResult::ok(), vec![purchased(token)])
        .await;

    assert_eq!(h.provider.stats().acknowledge_attempts, vec![token.to_string()]);
    assert_eq!(
        h.state.coordinator.purchase_state(token),
        Some(PurchaseState::Acknowledged)
    );
}

#[tokio::test]
async fn test_live_event_and_restore_share_one_verification() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&h.backend)
        .await;

    let token = "token-concurrent";
    h.provider.insert_purchase(purchased(token));

    let coordinator = h.state.coordinator.clone();
    let (_, summary) = tokio::join!(
        coordinator.on_purchases_updated(BillingResult::ok(), vec![purchased(token)]),
        coordinator.restore()
    );

    let summary = summary.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.acknowledged + summary.skipped, 1);
    assert_eq!(h.provider.stats().acknowledge_attempts.len(), 1);
    assert_eq!(
        h.state.coordinator.purchase_state(token),
        Some(PurchaseState::Acknowledged)
    );
}

#[tokio::test]
async fn test_pipeline_skips_token_already_in_flight() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&h.backend)
        .await;

    h.provider.insert_purchase(purchased("token-x"));

    let coordinator = h.state.coordinator.clone();
    let (a, b) = tokio::join!(
        coordinator.process_purchase(purchased("token-x"), PurchaseOrigin::Restore),
        coordinator.process_purchase(purchased("token-x"), PurchaseOrigin::Restore)
    );

    let mut outcomes = vec![a, b];
    outcomes.sort_by_key(|o| *o == ProcessOutcome::InFlight);
    assert_eq!(outcomes, vec![ProcessOutcome::Acknowledged, ProcessOutcome::InFlight]);
}

#[tokio::test]
async fn test_restore_cancels_abandoned_pending_purchases() {
    let h = harness().await;
    h.state
        .coordinator
        .on_purchases_updated(BillingResult::ok(), vec![pending("token-abandoned")])
        .await;
    assert_eq!(
        h.state.coordinator.purchase_state("token-abandoned"),
        Some(PurchaseState::Pending)
    );

    let summary = h.state.coordinator.restore().await.unwrap();

    assert_eq!(summary.canceled, 1);
    assert_eq!(
        h.state.coordinator.purchase_state("token-abandoned"),
        Some(PurchaseState::Canceled)
    );
}

#[tokio::test]
async fn test_restore_reports_query_failure() {
    let h = harness().await;
    h.provider.fail_purchase_queries(Some(BillingResult::new(
        ResponseCode::ServiceDisconnected,
        "",
    )));

    assert!(h.state.coordinator.restore().await.is_err());
}

#[tokio::test]
async fn test_purchase_event_for_already_acknowledged_purchase_skips_ack() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;

    let mut purchase = purchased("token-acked");
    purchase.acknowledged = true;
    h.state
        .coordinator
        .on_purchases_updated(BillingResult::ok(), vec![purchase])
        .await;

    assert!(h.provider.stats().acknowledge_attempts.is_empty());
    assert_eq!(
        h.state.coordinator.purchase_state("token-acked"),
        Some(PurchaseState::Acknowledged)
    );
}

/// Restore holds the token against a slow backend; a live event for it arrives meanwhile
async fn live_event_during_restore(status: u16) -> (Harness, Vec<UserMessage>) {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(status).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&h.backend)
        .await;
    let token = "token-live-during-restore";
    h.provider.insert_purchase(purchased(token));
    let mut messages = h.state.ui.subscribe();

    let coordinator = h.state.coordinator.clone();
    let restore = tokio::spawn(async move { coordinator.restore().await });
    assert!(eventually(|| {
        h.state.coordinator.purchase_state(token) == Some(PurchaseState::VerificationInFlight)
    })
    .await);

    let outcome = h
        .state
        .coordinator
        .process_purchase(purchased(token), PurchaseOrigin::Live)
        .await;
    let summary = restore.await.unwrap().unwrap();

    assert_eq!(summary.examined, 1);
    assert_eq!(summary.skipped, 0);
    if status == 200 {
        assert_eq!(outcome, ProcessOutcome::Acknowledged);
    } else {
        assert_eq!(outcome, ProcessOutcome::VerificationFailed);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = drain(&mut messages);
    (h, seen)
}

#[tokio::test]
async fn test_live_event_reports_activation_from_running_restore() {
    let (h, messages) = live_event_during_restore(200).await;

    assert_eq!(messages, vec![UserMessage::SubscriptionActivated]);
    assert_eq!(h.provider.stats().acknowledge_attempts.len(), 1);
    assert_eq!(
        h.state.coordinator.purchase_state("token-live-during-restore"),
        Some(PurchaseState::Acknowledged)
    );
}

#[tokio::test]
async fn test_live_event_reports_rejection_from_running_restore() {
    let (h, messages) = live_event_during_restore(500).await;

    assert_eq!(messages, vec![UserMessage::VerificationFailed]);
    assert!(h.provider.stats().acknowledge_attempts.is_empty());
}

#[tokio::test]
async fn test_acknowledged_purchase_survives_failed_reverification() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    let token = "token-entitled";
    h.provider.insert_purchase(purchased(token));

    h.state.coordinator.restore().await.unwrap();
    assert_eq!(
        h.state.coordinator.purchase_state(token),
        Some(PurchaseState::Acknowledged)
    );

    h.backend.reset().await;
    mount_backend(&h.backend, 500).await;
    let summary = h.state.coordinator.restore().await.unwrap();

    assert_eq!(summary.verification_failed, 1);
    assert_eq!(
        h.state.coordinator.purchase_state(token),
        Some(PurchaseState::Acknowledged)
    );
}

#[tokio::test]
async fn test_late_pending_event_does_not_revoke_acknowledgment() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    let token = "token-out-of-order";
    h.provider.insert_purchase(purchased(token));
    h.state.coordinator.restore().await.unwrap();
    let mut messages = h.state.ui.subscribe();

    h.state
        .coordinator
        .on_purchases_updated(BillingResult::ok(), vec![pending(token)])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        h.state.coordinator.purchase_state(token),
        Some(PurchaseState::Acknowledged)
    );
    assert!(drain(&mut messages).is_empty());
}
