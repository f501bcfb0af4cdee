//! Pibot core library — config, relay mailbox, platform channel, LLM client,
//! gateway, and the polling relay client used by the CLI.

pub mod audit;
pub mod channels;
pub mod client;
pub mod config;
pub mod exec;
pub mod gateway;
pub mod init;
pub mod interactions;
pub mod llm;
pub mod mailbox;
pub mod tasks;
