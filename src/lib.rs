pub mod api;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod worker;
