// WebDict session client - library root

pub mod config;
pub mod error;
pub mod http_client;
pub mod navigation;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
