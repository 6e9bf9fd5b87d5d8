//! Shared fixtures for the behavioural suites.

mod layout;
mod reporter;

pub use layout::DatabaseLayout;
pub use reporter::{LifecycleEvent, RecordingLifecycleReporter};
