//! Tollgate - Client-Side Traffic Control
//!
//! This crate implements a traffic-control layer for sensitive operations:
//! a multi-algorithm request rate limiter (fixed window, sliding window,
//! token bucket, leaky bucket) and a behavioral abuse-detection engine that
//! escalates from warnings through temporary blocks to permanent bans. All
//! state is held in process memory; nothing survives a restart.

pub mod abuse;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
