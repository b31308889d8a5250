// src/reminders/mod.rs

pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod window;

#[cfg(test)]
pub mod testing;

pub use dispatcher::{DispatchOptions, DispatchSummary, ReminderDispatcher};
pub use error::{DispatchError, StoreError};
pub use notifier::{EmailReminderSender, LogTransport, MailTransport, RelayTransport};
pub use scheduler::{ReminderScheduler, SchedulerConfig, SchedulerStatus};
pub use store::PgAppointmentStore;
