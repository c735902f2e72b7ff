//! Thin collaborator boundaries: cloud relay, remote stations, semantic
//! memory, and web tooling. All best-effort: a missing or failing
//! collaborator degrades the feature, never the engine.

pub mod cloud;
pub mod memsearch;
pub mod station;
pub mod web;
