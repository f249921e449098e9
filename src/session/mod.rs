pub mod identity;
pub mod store;
pub mod timer;

pub use identity::{validate_full_name, SubjectId, ValidationError};
pub use store::{SessionRecord, SessionStore};
pub use timer::{format_remaining, Countdown, SessionTimer, TickOutcome};
