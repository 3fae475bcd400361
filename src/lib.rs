pub mod broker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod logger;
pub mod normalizer;
pub mod server;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod testing;
pub mod topic;
