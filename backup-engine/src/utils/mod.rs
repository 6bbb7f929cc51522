//! Utility modules for the backup engine.

pub mod clock;
pub mod errors;
pub mod format;
pub mod logger;

pub use clock::{days_before, Clock, FixedClock, SystemClock};
pub use errors::{EngineError, Result};
