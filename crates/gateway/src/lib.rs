//! Multi-tenant gateway exposing OpenAPI-described REST APIs as MCP tools.
//!
//! One shared HTTP endpoint multiplexes many virtual MCP servers, keyed by a
//! tenant id in the request path. Each tenant wraps one REST backend via
//! `restgate-openapi-tools`; the gateway enforces per-tenant authentication
//! and admission control before any request reaches a tenant.

pub mod admin;
pub mod admission;
pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod router;
pub mod service;
