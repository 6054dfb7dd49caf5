//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. Broker transports are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod kafka;
mod memory;

pub use kafka::create_rdkafka_transport;

pub use memory::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};
