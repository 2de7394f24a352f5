//! CLI Commands

pub mod provision;
pub mod report;
pub mod run;
