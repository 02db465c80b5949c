//! Task weight table and time-based multipliers.

mod multiplier;
mod table;

pub use multiplier::{
    Composition, DAY_ENGAGEMENT_RULE, DEFAULT_DAY_FACTOR, DEFAULT_NIGHT_FACTOR, HourWindow, MultiplierPolicy,
    MultiplierRule, NIGHT_POSTING_RULE, TimeWindow, builtin_rules, parse_weekdays,
};
pub use table::{RejectedTask, Task, TaskTable, TaskTarget};
