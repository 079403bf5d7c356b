//! batchq common types
//!
//! Shared pieces used by both the gateway and the model server: the job wire
//! format, tensor payloads, stored results, the coordination store capability
//! and the result lifecycle policy.

pub mod config;
pub mod job;
pub mod lifecycle;
pub mod logging;
pub mod result;
pub mod store;
pub mod tensor;

pub use config::StoreConfig;
pub use job::{decode_job, decode_job_expecting, encode_job, DecodeError, Job};
pub use lifecycle::{ResultLifecycle, DEFAULT_RESULT_TTL};
pub use result::{Prediction, StoredResult};
pub use store::{CoordinationStore, MemoryStore, RedisStore, StoreError, Subscription};
pub use tensor::{DType, ImageBatch, ImagePayload, ImageSpec, TensorError};
