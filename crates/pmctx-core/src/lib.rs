//! pmctx-core: metrics context and fetch engine.
//!
//! Provides:
//! - `context`: per-thread current context over host, archive and local back ends
//! - `wire`: collector frame codec and blocking connection
//! - `local`: in-process agent registry and the multi-agent fetch splitter
//! - `archive`: archive writer, reader and forward/backward/interpolated replay
//! - `derived`: fallback to a derived-metric evaluator for unknown metrics
//! - `model`: metric identifiers, descriptors, values, instance profiles
//! - `config`: client timeouts, reconnect backoff, frame limits
//! - `util`: time and interval parsing

pub mod archive;
pub mod config;
pub mod context;
pub mod derived;
pub mod error;
pub mod local;
pub mod model;
pub mod util;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClientConfig, client_config, set_client_config};
pub use context::{ContextHandle, ContextKind};
pub use error::{ErrorKind, PmError};
pub use model::{
    Desc, FetchResult, InDom, InDomInstances, InstanceProfile, InstanceValue, Pmid, Timestamp,
    Value, ValueSet,
};
