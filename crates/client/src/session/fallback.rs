//! Offline fallback port.
//!
//! When no relay can be reached and none ever has been during this session,
//! the driver asks its fallback whether to pretend to be connected. Production
//! sessions use [`NoFallback`]; demos use [`DemoFallback`] so the operator
//! screens stay usable without a relay.

use rand::Rng;

pub trait OfflineFallback: Send {
    /// Client count to show while simulating, or `None` to keep retrying.
    fn simulated_clients(&mut self) -> Option<usize>;
}

/// Never simulates anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl OfflineFallback for NoFallback {
    fn simulated_clients(&mut self) -> Option<usize> {
        None
    }
}

/// Simulates a relay with between 1 and 10 listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoFallback;

impl OfflineFallback for DemoFallback {
    fn simulated_clients(&mut self) -> Option<usize> {
        Some(rand::thread_rng().gen_range(1..=10))
    }
}

impl<F> OfflineFallback for F
where
    F: FnMut() -> Option<usize> + Send,
{
    fn simulated_clients(&mut self) -> Option<usize> {
        self()
    }
}
