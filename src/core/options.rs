//! Purpose: Client configuration snapshot and the QoS profile forwarded to transports.
//! Exports: `ClientOptions`, `QosProfile`, `History`, `Reliability`, `Durability`.
//! Invariants: QoS is opaque to the client and forwarded verbatim.

use crate::core::allocator::{Allocator, default_allocator};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum History {
    KeepLast,
    KeepAll,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Reliable,
    BestEffort,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Volatile,
    TransientLocal,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct QosProfile {
    pub history: History,
    pub depth: usize,
    pub reliability: Reliability,
    pub durability: Durability,
}

impl QosProfile {
    /// Reliable, volatile, keep-last 10.
    pub const fn services_default() -> Self {
        Self {
            history: History::KeepLast,
            depth: 10,
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = history;
        self
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

impl Default for QosProfile {
    fn default() -> Self {
        Self::services_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub allocator: Allocator,
    pub qos: QosProfile,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self {
            allocator: default_allocator(),
            qos: QosProfile::services_default(),
        }
    }

    pub fn with_allocator(mut self, allocator: Allocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_qos(mut self, qos: QosProfile) -> Self {
        self.qos = qos;
        self
    }
}
