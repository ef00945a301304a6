//! Core domain types: names, clock, schedules, and targets.

pub mod clock;
pub mod schedule;
pub mod target;
pub mod types;
