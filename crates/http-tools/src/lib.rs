//! Request pipeline for MYOB (Acumatica contract-based) ERP operations.
//!
//! caller arguments → [`args`] → [`request`] → [`runtime`] (through the [`session`]) →
//! [`response_shaping`].
//!
//! This crate knows nothing about `OpenAPI` documents or tool registries; see
//! `myob-openapi-tools` for that layer.

pub mod args;
pub mod config;
pub mod error;
pub mod request;
pub mod response_shaping;
pub mod runtime;
pub mod safety;
pub mod semantics;
pub mod session;
