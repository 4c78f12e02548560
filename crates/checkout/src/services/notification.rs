//! Customer notifications. Delivery is best effort: callers log failures and
//! move on.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Order, OrderNumber, OrderStatus};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Error)]
#[error("Notification failed: {0}")]
pub struct NotificationError(pub String);

/// A message that was handed to a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderConfirmation {
        order_number: OrderNumber,
        recipient: Option<String>,
    },
    StatusUpdate {
        order_number: OrderNumber,
        status: OrderStatus,
        recipient: Option<String>,
    },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError>;

    async fn send_status_update(&self, order: &Order) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError> {
        tracing::info!(
            order_number = %order.order_number(),
            recipient = order.recipient_email().unwrap_or("-"),
            total = %order.total(),
            "order confirmation sent"
        );
        Ok(())
    }

    async fn send_status_update(&self, order: &Order) -> Result<(), NotificationError> {
        tracing::info!(
            order_number = %order.order_number(),
            recipient = order.recipient_email().unwrap_or("-"),
            status = %order.status(),
            "order status update sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Outbox {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications in memory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationSender {
    outbox: Arc<Mutex<Outbox>>,
}

impl InMemoryNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail.
    pub async fn set_fail(&self, fail: bool) {
        self.outbox.lock().await.fail = fail;
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.outbox.lock().await.sent.clone()
    }

    async fn record(&self, notification: Notification) -> Result<(), NotificationError> {
        let mut outbox = self.outbox.lock().await;
        if outbox.fail {
            return Err(NotificationError("mail server unavailable".to_string()));
        }
        outbox.sent.push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for InMemoryNotificationSender {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError> {
        self.record(Notification::OrderConfirmation {
            order_number: order.order_number().clone(),
            recipient: order.recipient_email().map(str::to_string),
        })
        .await
    }

    async fn send_status_update(&self, order: &Order) -> Result<(), NotificationError> {
        self.record(Notification::StatusUpdate {
            order_number: order.order_number().clone(),
            status: order.status(),
            recipient: order.recipient_email().map(str::to_string),
        })
        .await
    }
}
