pub mod config;
pub mod dashboard;
pub mod detector;
pub mod events;
pub mod git;
pub mod issues;
pub mod json_scan;
pub mod log;
pub mod paths;
pub mod session;
pub mod snapshot;
pub mod supervisor;
