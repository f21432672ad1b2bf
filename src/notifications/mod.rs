//! Notification sink trait and implementations.

use std::sync::{Arc, Mutex};

/// A user-facing notification about a backend failure.
///
/// Only genuine failures produce one; cancellations are silent and values
/// that could not be determined render as sentinels, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Trait for receiving notifications.
///
/// Implementations translate notifications into platform-specific display.
///
/// # Design Rules
///
/// - `notify()` must be fast and non-blocking (no network calls, no DB writes)
/// - Failure to deliver must not affect the emitting operation (best-effort)
pub trait NotificationSink: Send + Sync {
    /// Emit a single notification.
    fn notify(&self, notification: Notification);
}

/// No-op implementation for tests or contexts that don't surface errors.
#[derive(Clone, Default)]
pub struct NoOpNotificationSink;

impl NotificationSink for NoOpNotificationSink {
    fn notify(&self, _notification: Notification) {
        // Intentionally empty - notifications are discarded
    }
}

/// Mock sink for testing - collects emitted notifications.
#[derive(Clone, Default)]
pub struct MockNotificationSink {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl MockNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Clears collected notifications.
    pub fn clear(&self) {
        self.notifications.lock().unwrap().clear();
    }

    /// Returns the number of collected notifications.
    pub fn len(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    /// Returns true if no notifications have been collected.
    pub fn is_empty(&self) -> bool {
        self.notifications.lock().unwrap().is_empty()
    }
}

impl NotificationSink for MockNotificationSink {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}
