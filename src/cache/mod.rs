//! In-memory artifact cache.
//!
//! Two tiers back the route map: a *sized* tier bounded by the configured
//! byte ceiling, and a *permanent* tier for files at the root of the served
//! directory. Both are [`ByteCache`] instances; the permanent tier simply
//! has eviction disabled.

mod store;

pub use store::ByteCache;
