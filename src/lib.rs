//! OAuth 2.1 authorization server for MCP tool gateways.
//!
//! [`server::router`] mounts discovery, authorization, token and (optionally)
//! registration endpoints, and gates caller-supplied routes behind bearer
//! token validation.

pub mod config;
pub mod error;
pub mod oauth;
pub mod server;
