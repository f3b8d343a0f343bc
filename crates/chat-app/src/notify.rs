use std::fmt;
use std::sync::{Mutex, PoisonError};

/// User-visible failure classes; each error reaching a session boundary maps to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationClass {
    /// Connection dropped mid-response; the partial reply was discarded.
    TransientFailure,
    /// The reply is on screen but may not have been saved.
    PersistenceFailure,
    /// The proxy rejected the request before any content arrived.
    ProxyFailure,
}

impl NotificationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientFailure => "transient-failure",
            Self::PersistenceFailure => "persistence-failure",
            Self::ProxyFailure => "proxy-failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub class: NotificationClass,
    pub message: String,
}

impl Notification {
    pub fn new(class: NotificationClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{}] {}", self.class.as_str(), self.message)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Queue of pending notifications, drained by whoever renders them.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    pending: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for NotificationCenter {
    fn notify(&self, notification: Notification) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
