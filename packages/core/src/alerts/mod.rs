pub mod engine;
pub mod notifier;
pub mod payload;
pub mod webhook;

pub use engine::{AlertEngine, Decision};
pub use notifier::{spawn_dispatcher, AlertNotifier, LogNotifier, NotifyError};
pub use payload::AlertPayload;
pub use webhook::WebhookNotifier;
