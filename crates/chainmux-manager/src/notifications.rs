//! User-visible notifications raised when an app connects.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::NotificationError;

/// A notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

impl Notification {
    /// The notification raised once an app's spec resolved.
    pub fn app_connected(title: &str, app_name: &str, network: &str) -> Self {
        Self {
            title: title.to_string(),
            message: format!("App {app_name} connected to {network}."),
        }
    }
}

/// The host's notification preference store and notification surface.
#[async_trait]
pub trait NotificationService: Send + Sync + 'static {
    /// Whether the user enabled notifications.
    async fn enabled(&self) -> Result<bool, NotificationError>;

    /// Show `notification` under `id` (the app identity).
    async fn notify(&self, id: &str, notification: Notification) -> Result<(), NotificationError>;
}

/// Notifications turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifications;

#[async_trait]
impl NotificationService for DisabledNotifications {
    async fn enabled(&self) -> Result<bool, NotificationError> {
        Ok(false)
    }

    async fn notify(&self, _id: &str, _notification: Notification) -> Result<(), NotificationError> {
        Ok(())
    }
}
