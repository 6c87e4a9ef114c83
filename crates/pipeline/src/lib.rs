//! Inference pipeline and its lifecycle.
//!
//! A [`Pipeline`] owns an isolated inference worker (see [`worker`]) and drives it through
//! `idle → initializing → loading → downloading → ready`, retrying failed boots with
//! exponential backoff, hibernating after an idle window and waking again on demand.
//! Model loads can be serialized across processes with a named [`SessionLock`].

mod assets;
mod config;
mod error;
mod lifecycle;
mod session_lock;
pub mod worker;

pub use assets::{local_path, AssetLoader, LocalAssetLoader};
pub use config::{
    PipelineConfig, SessionLockConfig, DEFAULT_EMBEDDINGS_LOCATION, DEFAULT_MODEL_LOCATION,
};
pub use error::{PipelineError, Result};
pub use lifecycle::{Pipeline, PipelineSnapshot, PipelineState};
pub use session_lock::{acquire_session_lock, SessionLock};
