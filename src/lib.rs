//! contentgate: the caching and abuse-limiting core of a content API.
//!
//! Reads go through [`application::content::ContentService`], which memoizes
//! repository queries in a TTL-bound [`cache::CacheStore`]. Content mutations
//! are reported to [`cache::InvalidationIndex`], which evicts exactly the
//! entries they affect. Comment submission goes through
//! [`application::comments::CommentService`], gated by [`limiter::RateLimiter`].

pub mod application;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod infra;
pub mod limiter;
