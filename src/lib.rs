//! RateGuard - request admission decisions
//!
//! This crate decides whether a request identified by a key should be
//! admitted under a rate policy. Usage is tracked either in a fixed window
//! anchored at the key's first request or in a sliding log of admitted
//! request timestamps. All per-key state lives behind the [`store::Store`]
//! contract; [`store::MemoryStore`] is the in-process default.
//!
//! ```no_run
//! use rateguard::ratelimit::{Limiter, RateLimitPolicy};
//! use rateguard::store::MemoryStore;
//!
//! # async fn run() -> rateguard::error::Result<()> {
//! let limiter = Limiter::new(MemoryStore::new());
//! let policy = RateLimitPolicy::sliding(60_000, 100)?;
//!
//! let decision = limiter.check("203.0.113.7", &policy).await?;
//! if decision.blocked {
//!     // reject
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;
