pub mod notification;
pub mod publisher;

// Re-export key types for convenience
pub use notification::{NotificationEvent, NotificationKind, Notifier, PublisherNotifier};
pub use publisher::{EventPublisher, PublishedEvent};
