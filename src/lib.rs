//! Quotaguard - HTTP Request Rate Limiting
//!
//! This crate implements a token bucket rate limiter that sits in front of
//! HTTP handlers. Clients are identified by authenticated user, bearer token
//! or IP address, quotas can be overridden per path, and bucket state lives
//! either in-process or in a shared Redis store used by several instances.

pub mod config;
pub mod error;
pub mod web;
pub mod ratelimit;
pub mod store;
