#![forbid(unsafe_code)]

//! # Hinny Runtime
//!
//! Wires the hinny building blocks into a running service:
//!
//! - [`content`]: where scripts come from (a directory or an embedded bundle)
//! - [`engine`]: [`ScriptContext`]s and the factory the pool uses to build them
//! - [`mapper`]: SQL-mapper files, reloaded one file at a time
//! - [`router`]: request path resolution and one-borrow-per-request dispatch
//! - [`families`]: datasource, cache and metadata registries
//! - [`coordinator`]: ordered startup and best-effort shutdown
//!
//! A file watcher over the script root clears the context pool when scripts
//! change, so the next request runs against freshly loaded sources.

pub mod content;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod families;
pub mod mapper;
pub mod router;
pub mod settings;

pub use content::{ContentMode, EmbeddedRoot, FileSystemRoot, RootContentProvider};
pub use coordinator::{ContextPool, LifecycleCoordinator, RuntimeHandle, ShutdownReport};
pub use engine::{ScriptContext, ScriptContextFactory};
pub use error::{BoxError, RuntimeError, RuntimeResult};
pub use families::{Discoveries, FamilySettings, Registries};
pub use mapper::{MapperArtifact, MapperParser, MapperStore, ReloadOutcome};
pub use router::{
    DefaultExceptionResolver, ExceptionResolver, PrefixMapping, RouterConfig, ScriptRoute,
    ScriptRouter,
};
pub use settings::{MapperSettings, ScriptSettings, Settings};
