//! HTTP API Module
//!
//! Provides a REST API for reading and moving cluster and member states.

mod http;

pub use http::{AppState, ErrorResponse, HttpServer, PingResponse};
