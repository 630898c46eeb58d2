//! HTTP front door for the stash file store.
//!
//! The binary in `main.rs` wires configuration and signals; the router and
//! handlers live in [`web`] so integration tests can drive them directly.

pub mod web;
