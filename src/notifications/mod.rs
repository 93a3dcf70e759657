pub mod cert_reminder;
pub mod models;
pub mod senders;
pub mod service;

pub use cert_reminder::CertReminder;
pub use service::{NotificationDelivery, NotificationDispatcher, NotificationError};
