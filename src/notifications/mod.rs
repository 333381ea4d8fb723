//! Best-effort customer notifications.
//!
//! Delivery (email, SMS) is an external concern. Callers hand events to
//! [`dispatch`], which runs the notifier on its own task so that a slow or
//! failing channel can never change the outcome of the request that fired it.

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::entities::OrderStatus;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderPlaced {
        order_number: String,
        user_id: Uuid,
        total_amount: i64,
        email: Option<String>,
    },
    OrderCancelled {
        order_number: String,
        user_id: Uuid,
        status: OrderStatus,
        email: Option<String>,
    },
}

impl OrderEvent {
    pub fn order_number(&self) -> &str {
        match self {
            Self::OrderPlaced { order_number, .. } | Self::OrderCancelled { order_number, .. } => {
                order_number
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_placed(&self, event: &OrderEvent) -> Result<(), NotificationError>;
    async fn order_cancelled(&self, event: &OrderEvent) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn order_placed(&self, event: &OrderEvent) -> Result<(), NotificationError> {
        info!(order_number = event.order_number(), ?event, "order placed notification");
        Ok(())
    }

    async fn order_cancelled(&self, event: &OrderEvent) -> Result<(), NotificationError> {
        info!(order_number = event.order_number(), ?event, "order cancelled notification");
        Ok(())
    }
}

/// Fire-and-forget delivery. Failures are logged and counted, never returned.
pub fn dispatch(notifier: Arc<dyn Notifier>, event: OrderEvent) {
    tokio::spawn(async move {
        let result = match &event {
            OrderEvent::OrderPlaced { .. } => notifier.order_placed(&event).await,
            OrderEvent::OrderCancelled { .. } => notifier.order_cancelled(&event).await,
        };
        if let Err(err) = result {
            counter!("nursery_notifications.failed", 1);
            error!(
                order_number = event.order_number(),
                error = %err,
                "notification delivery failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct FailingNotifier(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn order_placed(&self, event: &OrderEvent) -> Result<(), NotificationError> {
            let _ = self.0.send(event.order_number().to_string());
            Err(NotificationError::Delivery("smtp down".into()))
        }

        async fn order_cancelled(&self, _event: &OrderEvent) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn dispatch_runs_notifier_and_swallows_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(
            Arc::new(FailingNotifier(tx)),
            OrderEvent::OrderPlaced {
                order_number: "ORD-TEST".into(),
                user_id: Uuid::new_v4(),
                total_amount: 1597,
                email: None,
            },
        );

        assert_eq!(rx.recv().await.as_deref(), Some("ORD-TEST"));
    }
}
