//! Session provider implementations.

#[cfg(feature = "loopback")]
pub mod loopback;

#[cfg(feature = "loopback")]
pub use loopback::LoopbackProvider;
