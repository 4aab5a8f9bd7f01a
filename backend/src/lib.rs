pub mod config;
pub mod error;
pub mod input;
pub mod mailbox;
pub mod metrics;
pub mod paths;
pub mod replay;
pub mod router;
pub mod sink;
