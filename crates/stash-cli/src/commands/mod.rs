pub mod common;
pub mod create;
pub mod drain;
pub mod queue;
pub mod resolve;
pub mod save;
pub mod show;
pub mod status;
pub mod watch;
