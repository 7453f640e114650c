//! MYOB/Acumatica `OpenAPI` operations as callable tools.
//!
//! Used by the `myob-tools` command-line host. The crate covers:
//! - loading the `OpenAPI` document and discovering operations
//! - the tool registry ([`runtime::ErpToolSource`]) with login/logout and diagnostics
//! - the pagination helper built on top of it

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod pagination;
pub mod runtime;
