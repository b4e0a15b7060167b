//! Edit tracking: change magnitude, debounced re-analysis, preview refresh.

pub mod debounce;
pub mod diff;
pub mod trigger;

pub use debounce::{DebounceTicket, Debouncer, Fired};
pub use diff::changed_line_magnitude;
pub use trigger::{EditAccumulator, EditOutcome, EditTrigger, PreviewSnapshot};
