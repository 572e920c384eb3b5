//! Shared types for the public-address relay and its clients.

pub mod error;
pub mod languages;
pub mod models;
pub mod protocol;

pub use error::*;
pub use languages::*;
pub use models::*;
pub use protocol::*;
