//! # infera-core: arena-scoped inference execution
//!
//! Sits between application code and a precompiled native graph. A
//! [`Translator`] turns an application input into named tensors and the
//! graph's outputs back into an application output; the [`Predictor`] runs
//! the three phases, waits for asynchronous device work, times each phase and
//! guarantees that every native buffer allocated for a call is released
//! exactly once, whether the call succeeds or fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Predictor<T>                        │
//! │   top-level Arena ── CachedOp ── Option<MetricsSink>       │
//! └──────┬──────────────────┬──────────────────┬──────────────┘
//!        │ arena A          │ arena F          │ arena B
//!        ▼                  ▼                  ▼
//!  T::process_input   CachedOp::forward   T::process_output
//!        │                  │                  ▲
//!        └── TensorList ────┘── await_all ─────┘
//!                           │
//!                           ▼
//!            infera_backends::Backend (SharedBackend)
//! ```
//!
//! ## Modules
//!
//! - [`arena`]: hierarchical buffer ownership with cascading release
//! - [`tensor`] / [`list`]: handles and ordered named lists of them
//! - [`translator`] / [`context`]: the user-supplied conversion contract
//! - [`predictor`]: the execution engine
//! - [`metrics`]: sinks for per-phase timing
//! - [`config`]: environment-driven engine settings

pub mod arena;
mod cached_op;
pub mod config;
pub mod context;
pub mod error;
pub mod list;
pub mod metrics;
pub mod predictor;
pub mod tensor;
pub mod translator;

pub use arena::{Arena, ArenaId, ArenaStats};
pub use config::PredictorConfig;
pub use context::StageContext;
pub use error::{BoxError, Error, Phase, Result, TranslateResult};
pub use list::TensorList;
pub use metrics::{Metric, MetricUnit, Metrics, MetricsSink, TracingMetrics};
pub use predictor::Predictor;
pub use tensor::Tensor;
pub use translator::Translator;

// Backend types that appear in this crate's public API
pub use infera_backends::{shared, CpuBackend, DType, Device, HostTensor, Model, SharedBackend};
