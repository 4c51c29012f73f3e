//! Client for the remote data-preparation service and its retry wrapper.

pub mod client;
pub mod retry;

pub use client::{HttpRemoteClient, RemoteClient, WorkUnit};
pub use retry::{RetryPolicy, RetryingClient};
