//! Cadence Core - admission-drain driver for step-wise inference engines
//!
//! This crate implements:
//! - The driver loop that admits catalog requests one per tick and reports
//!   finished outputs after every engine step
//! - The `Engine` capability trait the driver runs against
//! - A deterministic reference engine with priority scheduling, paged KV
//!   accounting, best-of sampling and beam search over a synthetic model

pub mod catalog;
pub mod driver;
pub mod engine;
pub mod error;
pub mod kv_cache;
pub mod model;
pub mod request;
pub mod sampler;
pub mod scheduler;
pub mod sim_engine;

pub use catalog::{Catalog, WorkloadEntry};
pub use driver::{
    Admission, AdmissionCounter, Driver, DriverConfig, RunSummary, SharedAdmission, TickReport,
    DEFAULT_ADMISSION_CAP,
};
pub use engine::Engine;
pub use error::{DriverError, EngineError};
pub use kv_cache::{CacheStats, PagePool, PAGE_SIZE};
pub use request::{
    CompletionOutput, FinishReason, Request, RequestId, RequestOutput, SamplingParams,
    TokenLogprob,
};
pub use scheduler::{ScheduledBatch, Scheduler, SchedulerStats};
pub use sim_engine::{SimEngine, SimEngineConfig, SimEngineStats};
