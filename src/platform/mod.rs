//! Thin OS layer: process liveness probes and signal delivery.

pub mod process;
