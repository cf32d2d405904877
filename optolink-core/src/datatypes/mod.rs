//! Value types carried by Optolink data points

pub mod time_of_day;
pub mod timer_schedule;
pub mod value;

// Re-export types
pub use time_of_day::TimeOfDay;
pub use timer_schedule::{SwitchingPair, TimerEncoding, TimerSchedule};
pub use value::TypedValue;
