//! Serial UI context.
//!
//! User-visible messages and purchase-flow launches are funneled through a
//! single task so they are handled in order on one execution context, the
//! way the provider requires for its purchase UI. Network calls never run here.

use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::BridgeError,
    models::{catalog::PlanId, common::UserMessage, purchase::LaunchOutcome},
    services::PurchaseCoordinator,
};

const MESSAGE_BUFFER: usize = 64;

#[derive(Debug)]
enum UiCommand {
    Notify(UserMessage),
    LaunchPurchase(PlanId),
}

/// Cloneable sender side of the UI context
#[derive(Clone)]
pub struct UiHandle {
    commands: mpsc::UnboundedSender<UiCommand>,
    messages: broadcast::Sender<UserMessage>,
}

/// Receiving side; consumed by [`UiDispatcher::spawn`]
pub struct UiDispatcher {
    commands: mpsc::UnboundedReceiver<UiCommand>,
    messages: broadcast::Sender<UserMessage>,
}

pub fn channel() -> (UiHandle, UiDispatcher) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (messages, _) = broadcast::channel(MESSAGE_BUFFER);

    (
        UiHandle {
            commands: commands_tx,
            messages: messages.clone(),
        },
        UiDispatcher {
            commands: commands_rx,
            messages,
        },
    )
}

impl UiHandle {
    /// Queue a user-visible message
    pub fn notify(&self, message: UserMessage) {
        if self.commands.send(UiCommand::Notify(message)).is_err() {
            warn!("UI dispatcher stopped, message dropped");
        }
    }

    /// Queue a purchase-flow launch; returns before the launch happens
    pub fn launch_purchase(&self, plan_id: PlanId) -> Result<(), BridgeError> {
        self.commands
            .send(UiCommand::LaunchPurchase(plan_id))
            .map_err(|_| BridgeError::Unavailable)
    }

    /// Observe user-visible messages (the shell renders these as toasts)
    pub fn subscribe(&self) -> broadcast::Receiver<UserMessage> {
        self.messages.subscribe()
    }
}

impl UiDispatcher {
    pub fn spawn(self, coordinator: Arc<PurchaseCoordinator>) -> JoinHandle<()> {
        tokio::spawn(self.run(coordinator))
    }

    async fn run(mut self, coordinator: Arc<PurchaseCoordinator>) {
        while let Some(command) = self.commands.recv().await {
            match command {
                UiCommand::Notify(message) => {
                    info!(message = %message, "User message");
                    // No subscribers is fine: nothing is rendering yet
                    let _ = self.messages.send(message);
                }
                UiCommand::LaunchPurchase(plan_id) => match coordinator.initiate(&plan_id).await {
                    Ok(LaunchOutcome::Launched) => debug!(plan = %plan_id, "Purchase flow launched"),
                    Ok(LaunchOutcome::NotReady) => debug!(plan = %plan_id, "Purchase not ready"),
                    Err(e) => warn!(plan = %plan_id, "Purchase launch failed: {}", e),
                },
            }
        }
        debug!("UI dispatcher stopped");
    }
}
