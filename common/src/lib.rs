pub mod command;
pub mod config;
pub mod detect;
pub mod frame;
pub mod link;
pub mod protocol;
pub mod zone;
