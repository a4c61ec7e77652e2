pub mod backend;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod layout;
pub mod output;
pub mod protocol;
pub mod signal;
pub mod util;
