//! Value estimation: model interface, replicas and batched inference.
//!
//! ## Overview
//!
//! - **Traits**: `ValueEstimator`, the only view the pipeline has of a model
//! - **Devices**: `DeviceManager` multiplexes replicas between inference and
//!   learning through scoped `DeviceLoan`s
//! - **Inference**: `BatchedEvaluator` batches, deduplicates and caches
//!   position evaluations for many worker threads
//! - **Reference model**: `LinearValueModel`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use selfplay_trainer::nn::{BatchedEvaluator, DeviceManager, EvaluatorConfig, LinearValueModel};
//!
//! let mut devices = DeviceManager::new();
//! devices.add_device(Arc::new(LinearValueModel::new("cpu:0", "experiment", 8)));
//! let evaluator = BatchedEvaluator::new(Arc::new(devices), EvaluatorConfig::default()).unwrap();
//! # let _ = evaluator;
//! ```

pub mod cache;
pub mod device;
pub mod evaluator;
pub mod linear;
pub mod traits;

// Re-export main types
pub use cache::{CacheInfo, LruCache, ShardedCache};
pub use device::{DeviceLoan, DeviceManager, LoanKind};
pub use evaluator::{BatchedEvaluator, EvaluatorConfig};
pub use linear::LinearValueModel;
pub use traits::{CheckpointId, LossInfo, ValueEstimator};
