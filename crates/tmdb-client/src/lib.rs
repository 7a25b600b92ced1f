//! TMDB v3 client used as the tracker's catalog source.
//!
//! This crate provides a rate-limited, retry-enabled client for the parts of
//! The Movie Database API the tracker needs (shows, seasons, movies) and maps
//! its responses onto the adapter-neutral types in `shared::source`.

pub mod client;
pub mod rate_limiter;
pub mod types;

pub use client::TmdbClient;
pub use rate_limiter::RateLimiter;
