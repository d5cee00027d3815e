use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    models::common::{ConnectionState, UserMessage},
    provider::{BillingProvider, ProviderEvent, ProviderEventSender},
    services::{ProductCatalog, PurchaseCoordinator, UiHandle},
};

/// Owns the provider connection lifecycle and pumps provider events.
///
/// One event channel and one pump task exist for the lifetime of the
/// connection, so reconnecting never registers a second listener.
pub struct BillingConnection {
    provider: Arc<dyn BillingProvider>,
    catalog: Arc<ProductCatalog>,
    coordinator: Arc<PurchaseCoordinator>,
    ui: UiHandle,
    state: watch::Sender<ConnectionState>,
    events: Mutex<Option<ProviderEventSender>>,
    restore_interval: Option<Duration>,
    reconciler_started: AtomicBool,
}

impl BillingConnection {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        catalog: Arc<ProductCatalog>,
        coordinator: Arc<PurchaseCoordinator>,
        ui: UiHandle,
        state: watch::Sender<ConnectionState>,
        restore_interval: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            catalog,
            coordinator,
            ui,
            state,
            events: Mutex::new(None),
            restore_interval,
            reconciler_started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Start provider setup. The outcome is published as `Ready` or `Failed`.
    ///
    /// No-op while already connecting or connected.
    pub fn connect(self: &Arc<Self>) {
        let mut begun = false;
        self.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Ready => false,
            _ => {
                *state = ConnectionState::Connecting;
                begun = true;
                true
            }
        });

        if !begun {
            debug!("Connect ignored, state is {:?}", self.state());
            return;
        }

        info!("Connecting to billing provider");
        let events = self.event_sender();
        self.provider.start_connection(events);
    }

    /// Release provider resources. Pending background work runs to completion.
    pub fn disconnect(&self) {
        self.provider.end_connection();
        self.state.send_replace(ConnectionState::Disconnected);
        info!("Billing provider disconnected");
    }

    fn event_sender(self: &Arc<Self>) -> ProviderEventSender {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(sender) = events.as_ref() {
            return sender.clone();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(pump_events(Arc::downgrade(self), receiver));
        *events = Some(sender.clone());
        sender
    }

    fn handle_event(self: &Arc<Self>, event: ProviderEvent) {
        match event {
            ProviderEvent::SetupFinished(result) => {
                if self.state() != ConnectionState::Connecting {
                    debug!("Setup result arrived after disconnect, ignoring");
                    return;
                }
                if result.is_ok() {
                    self.state.send_replace(ConnectionState::Ready);
                    info!("Billing provider ready");
                    self.on_ready();
                } else {
                    let reason = result.reason();
                    warn!("Billing setup failed: {}", reason);
                    self.state.send_replace(ConnectionState::Failed(reason.clone()));
                    self.ui.notify(UserMessage::BillingNotReady(reason));
                }
            }
            ProviderEvent::ServiceDisconnected => {
                warn!("Billing service disconnected by provider");
                self.state.send_replace(ConnectionState::Disconnected);
            }
            ProviderEvent::PurchasesUpdated(result, purchases) => {
                let coordinator = self.coordinator.clone();
                tokio::spawn(async move {
                    coordinator.on_purchases_updated(result, purchases).await;
                });
            }
        }
    }

    /// Initial catalog load and restore pass after every successful setup
    fn on_ready(self: &Arc<Self>) {
        self.catalog.spawn_refresh();

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.restore().await {
                warn!("Restore after connect failed: {}", e);
            }
        });

        if let Some(interval) = self.restore_interval {
            if !self.reconciler_started.swap(true, Ordering::SeqCst) {
                spawn_reconciler(Arc::downgrade(self), interval);
            }
        }
    }
}

async fn pump_events(
    connection: Weak<BillingConnection>,
    mut events: mpsc::UnboundedReceiver<ProviderEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(connection) = connection.upgrade() else {
            break;
        };
        connection.handle_event(event);
    }
    debug!("Provider event pump stopped");
}

/// Periodic restore pass while connected
fn spawn_reconciler(connection: Weak<BillingConnection>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; the Ready transition already restored
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(connection) = connection.upgrade() else {
                break;
            };
            if !connection.state().is_ready() {
                continue;
            }
            if let Err(err) = connection.coordinator.restore().await {
                warn!(?err, "Scheduled restore pass failed");
            }
        }
    });
}
