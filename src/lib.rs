//! An outbound notification delivery engine.
//!
//! This crate dispatches notifications (email, SMS, push) through pluggable
//! delivery channels with **reliable-delivery** semantics for a multi-tenant
//! application.
//!
//! ## Guarantees
//! - At most one in-flight attempt per notification
//! - Bounded automatic retry with exponential backoff
//! - Deferred sends via a polled due-time field (survives restarts)
//! - Per-category rate caps and quiet-hours suppression
//! - Per-channel worker isolation
//!
//! ## Non-Guarantees
//! - Exactly-once delivery to the channel's downstream transport
//! - Ordering across distinct notifications
//! - Storage durability (owned by the `Repository` implementation)
//!
//! The heart of the crate is the notification state machine
//! (`pending -> processing -> {sent, pending(retry), failed, cancelled}`)
//! and the polling [`Dispatcher`] that drives it. The claim into
//! `processing` is an atomic compare-and-set at the repository, so workers
//! can scale across processes without double-sending.

mod batch;
mod channel;
mod dispatcher;
mod eligibility;
mod error;
mod repository;
mod retry;
mod state;
mod types;
mod worker;

#[cfg(feature = "postgres")]
mod repository_postgres;

pub use batch::BatchCoordinator;
pub use channel::{
    ChannelAdapter, EmailAdapter, EmailConfig, PushAdapter, PushConfig, SendRequest, SmsAdapter,
    SmsConfig,
};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use eligibility::{Decision, DenyReason, EligibilityFilter};
pub use error::{PermanentError, SendFailure, StateError, TransientError, ValidationError};
pub use repository::{InMemoryRepository, Repository};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::StateMachine;
pub use types::{
    now_secs, Batch, BatchId, BatchStatus, Category, CategoryName, ChannelKind, DeliveryLogEntry,
    Frequency, Notification, NotificationId, NotificationStatus, Preference, QuietHours, Recipient,
    UserId,
};

#[cfg(feature = "postgres")]
pub use repository_postgres::PostgresRepository;
