//! The create / validate / destroy capability consumed by the pool.

use std::future::Future;

use crate::error::BoxError;

/// Builds, checks and tears down pooled instances.
///
/// `create` may be expensive (it is the cost pooling amortizes). `validate`
/// must be cheap and free of side effects. `destroy` receives the instance by
/// value, so a given instance can only ever be destroyed once.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled instance type.
    type Instance: Send + Sync + 'static;

    /// Identifier used in logs and errors (e.g. "script-engine").
    fn id(&self) -> &str;

    /// Build a fresh instance.
    fn create(&self) -> impl Future<Output = Result<Self::Instance, BoxError>> + Send;

    /// Check whether an instance is still usable.
    fn validate(&self, _instance: &Self::Instance) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// Permanently dispose of an instance.
    fn destroy(&self, instance: Self::Instance) -> impl Future<Output = Result<(), BoxError>> + Send {
        drop(instance);
        async { Ok(()) }
    }
}
