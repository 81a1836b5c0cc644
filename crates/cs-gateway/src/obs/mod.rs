//! Lightweight in-process metrics (dependency-free by design, §6 `/metrics`).

pub mod metrics;
