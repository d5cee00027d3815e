use flowqr::models::common::{BillingResult, ConnectionState, PurchaseState, ResponseCode, UserMessage};
use flowqr::models::purchase::LaunchOutcome;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::common::{
    connect_ready, eventually, expect_message, harness, harness_with, mount_backend, purchased,
    test_config, MONTHLY_PLAN_ID,
};

#[tokio::test]
async fn test_ready_loads_catalog_and_restores() {
    let h = harness().await;
    mount_backend(&h.backend, 200).await;
    h.provider.insert_purchase(purchased("token-from-last-install"));

    connect_ready(&h).await;

    assert_eq!(h.state.connection.state(), ConnectionState::Ready);
    assert_eq!(h.state.catalog.list_plans().len(), 2);
    assert!(eventually(|| {
        h.state.coordinator.purchase_state("token-from-last-install")
            == Some(PurchaseState::Acknowledged)
    })
    .await);
}

#[tokio::test]
async fn test_connect_while_ready_is_noop() {
    let h = harness().await;
    connect_ready(&h).await;

    h.state.connection.connect();
    h.state.connection.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.provider.stats().connections, 1);
    assert_eq!(h.state.connection.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_setup_failure_then_reconnect() {
    let h = harness().await;
    h.provider.set_setup_result(BillingResult::new(
        ResponseCode::BillingUnavailable,
        "Billing unavailable on this device",
    ));
    let mut messages = h.state.ui.subscribe();
    let mut state = h.state.connection.subscribe();

    h.state.connection.connect();

    tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| matches!(s, ConnectionState::Failed(_))),
    )
    .await
    .unwrap()
    .unwrap();
    expect_message(
        &mut messages,
        UserMessage::BillingNotReady("Billing unavailable on this device".to_string()),
    )
    .await;
    assert!(h.state.catalog.is_empty());

    h.provider.set_setup_result(BillingResult::ok());
    connect_ready(&h).await;

    assert_eq!(h.provider.stats().connections, 2);
}

#[tokio::test]
async fn test_launch_is_refused_when_not_connected() {
    let h = harness().await;
    connect_ready(&h).await;
    h.state.connection.disconnect();
    let mut messages = h.state.ui.subscribe();

    let outcome = h
        .state
        .coordinator
        .initiate(&MONTHLY_PLAN_ID.parse().unwrap())
        .await
        .unwrap();

    assert_eq!(outcome, LaunchOutcome::NotReady);
    expect_message(
        &mut messages,
        UserMessage::BillingNotReady("Disconnected".to_string()),
    )
    .await;
    assert!(h.provider.stats().launches.is_empty());
}

#[tokio::test]
async fn test_reconnect_after_drop_processes_events_once() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.backend)
        .await;
    connect_ready(&h).await;

    let mut state = h.state.connection.subscribe();
    h.provider.drop_connection();
    tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();

    connect_ready(&h).await;
    assert_eq!(h.provider.stats().connections, 2);
    assert!(eventually(|| h.provider.stats().purchase_queries >= 2).await);

    let mut messages = h.state.ui.subscribe();
    h.state.bridge.buy(MONTHLY_PLAN_ID).unwrap();
    expect_message(&mut messages, UserMessage::SubscriptionActivated).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.provider.stats().acknowledge_attempts.len(), 1);
}

#[tokio::test]
async fn test_periodic_restore_runs_while_ready() {
    let mut config = test_config(String::new());
    config.billing.restore_interval_secs = Some(1);
    let h = harness_with(config).await;

    connect_ready(&h).await;

    assert!(eventually(|| h.provider.stats().purchase_queries >= 2).await);
}
