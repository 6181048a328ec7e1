pub mod core;
pub mod master_data;
pub mod schedule;
pub mod school;
pub mod setup;
