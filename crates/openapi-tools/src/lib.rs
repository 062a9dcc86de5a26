//! OpenAPI -> MCP tooling.
//!
//! This crate turns an OpenAPI/Swagger document into a set of MCP tools and
//! proxies tool calls back to the described REST API. It is consumed by
//! `restgate-gateway`, which hosts one compiled tool set per tenant.
//!
//! It intentionally contains **no** tenant or gateway policy logic.

pub mod compiler;
pub mod config;
pub mod error;
pub mod runtime;
pub mod spec;
