//! Request and Response models for the worker API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{validate_key, DeltaParams, ManyRequest, SetRequest};
pub use responses::{
    CounterResponse, DeleteResponse, ErrorResponse, FlushResponse, GetResponse, HealthResponse,
    ManyResponse, SetResponse, StatsResponse,
};
