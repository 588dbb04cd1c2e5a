//! # Hinny resources
//!
//! The two resource-management building blocks of hinny:
//!
//! - [`NamedResourceRegistry`]: name → resource maps with one default,
//!   populated once from discovered resources plus merged configuration.
//! - [`EngineInstancePool`]: a bounded pool of expensive runtime contexts
//!   with validation, idle eviction and generation-based invalidation.

pub mod error;
pub mod factory;
pub mod pool;
pub mod registry;

pub use error::{BoxError, Error, Result};
pub use factory::ResourceFactory;
pub use pool::{EngineInstancePool, PoolConfig, PoolStats, PoolStrategy, PooledInstance};
pub use registry::{Discovered, NamedResourceRegistry, Population, Release, TeardownReport};
