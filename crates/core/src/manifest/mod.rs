//! # Architecture Manifest
//!
//! Data model for the architecture phase's output and the tolerant
//! markdown parser that produces it.

pub mod parser;
pub mod types;

pub use parser::{parse_manifest, MANIFEST_JSON, MANIFEST_MD, MAX_PARALLEL_AGENTS};
pub use types::{
    ArchitectureManifest, ArchitectureType, Complexity, Component, ComponentType, EstimatedSize,
};
