//! Notification delivery: notice objects, subscriptions and rendering

pub mod dispatcher;
pub mod subscription;
pub mod template;

pub use dispatcher::{DispatchMode, NotificationDispatcher};
pub use subscription::SubscriptionDispatcher;
pub use template::{CardRenderer, TemplateRenderer};
