//! Change notification
//!
//! Subscribers register a filter and an unbounded channel. On subscribe they
//! first receive one `Current` event per matching document, then every
//! matching committed change in WAL sequence order. A subscriber whose
//! channel is closed is dropped on the next delivery attempt.

mod event;
mod notifier;
mod subscription;

pub use event::{ChangeEvent, ChangeKind};
pub use notifier::{ChangeNotifier, CurrentState, PublishOutcome, SubscriptionHandle};
pub use subscription::{
    EventReceiver, EventSender, SubscriptionFilter, SubscriptionId, SubscriptionTarget,
};
