pub mod core;
pub mod fees;
pub mod payments;
pub mod schedule;
pub mod setup;
