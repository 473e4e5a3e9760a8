//! Concrete capability implementations

pub mod http;
pub mod memory;

pub use http::{HttpLoginClient, HttpLoginTokenIssuer};
pub use memory::{ActiveSession, MemoryChannel, MemoryDeviceStore, MemoryHomeserver};
