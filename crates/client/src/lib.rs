//! Public-address client library.
//!
//! Operator and receiver sessions for the relay, plus the small amount of
//! local state (history, last announcement) an operator console or receiver
//! display keeps between runs.

pub mod config;
pub mod error;
pub mod history;
pub mod preferences;
pub mod session;
pub mod storage;

pub use config::ClientConfig;
pub use error::{SessionError, StorageError};
pub use history::HistoryCache;
pub use session::{
    BroadcastOutcome, ConnectionState, DemoFallback, NoFallback, OfflineFallback, Role, Session,
    SessionConfig, SessionNotice, SessionStatus,
};
pub use storage::Storage;
