// src/core/mod.rs

/// Data types shared by every stage: targets, TLS matrix, scan records.
pub mod models;

/// Probe components and the per-domain pipeline.
pub mod scanner;

/// Known parking providers.
pub mod knowledge_base;

/// Worker pool and single writer.
pub mod orchestrator;

pub mod sink;
