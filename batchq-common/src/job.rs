//! Job wire format.
//!
//! Jobs are stored in the queue as JSON objects:
//!
//! ```json
//! {"id": "6f1c...", "image": "<base64>", "shape": [1, 224, 224, 3], "dtype": "float32"}
//! ```
//!
//! The image bytes are the raw little-endian tensor buffer. Shape and dtype
//! travel with the bytes because the consumer has no other way to learn them.
//! An optional `enqueued_at` timestamp lets workers report queue latency.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::tensor::{DType, ImagePayload, ImageSpec, TensorError};

/// One unit of submitted work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Queue correlation token and result-store key.
    pub id: String,
    pub payload: ImagePayload,
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job with a fresh UUID, stamped with the current time.
    pub fn new(payload: ImagePayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: Some(Utc::now()),
        }
    }

    pub fn with_id(id: impl Into<String>, payload: ImagePayload) -> Self {
        Self {
            id: id.into(),
            payload,
            enqueued_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireJob {
    id: String,
    image: String,
    shape: Vec<usize>,
    dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enqueued_at: Option<DateTime<Utc>>,
}

/// A queue item that could not be turned into a [`Job`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("job is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("job has no usable id")]
    MissingId,

    #[error("job {id} is malformed: {source}")]
    InvalidFields {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("job {id} has an invalid base64 image: {source}")]
    InvalidImage {
        id: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("job {id} has unknown dtype '{dtype}'")]
    UnknownDtype { id: String, dtype: String },

    #[error("job {id} carries a bad tensor: {source}")]
    InvalidTensor {
        id: String,
        #[source]
        source: TensorError,
    },
}

impl DecodeError {
    /// The job id, when it could be recovered from the malformed item.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            DecodeError::InvalidJson(_) | DecodeError::MissingId => None,
            DecodeError::InvalidFields { id, .. }
            | DecodeError::InvalidImage { id, .. }
            | DecodeError::UnknownDtype { id, .. }
            | DecodeError::InvalidTensor { id, .. } => Some(id),
        }
    }
}

/// Serialize a job for the queue.
pub fn encode_job(job: &Job) -> Result<Vec<u8>, serde_json::Error> {
    let wire = WireJob {
        id: job.id.clone(),
        image: STANDARD.encode(&job.payload.data),
        shape: job.payload.shape.clone(),
        dtype: job.payload.dtype.as_str().to_string(),
        enqueued_at: job.enqueued_at,
    };
    serde_json::to_vec(&wire)
}

/// Parse a queue item back into a job.
pub fn decode_job(bytes: &[u8]) -> Result<Job, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(DecodeError::InvalidJson)?;

    // Pull the id out first so later failures can still be reported against it.
    let id = match value.get("id").and_then(|v| v.as_str()) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => return Err(DecodeError::MissingId),
    };

    let wire: WireJob = serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields {
        id: id.clone(),
        source,
    })?;

    let dtype: DType = wire
        .dtype
        .parse()
        .map_err(|dtype| DecodeError::UnknownDtype {
            id: id.clone(),
            dtype,
        })?;

    let data = STANDARD
        .decode(wire.image.as_bytes())
        .map_err(|source| DecodeError::InvalidImage {
            id: id.clone(),
            source,
        })?;

    let payload = ImagePayload::new(wire.shape, dtype, data).map_err(|source| {
        DecodeError::InvalidTensor {
            id: id.clone(),
            source,
        }
    })?;

    Ok(Job {
        id,
        payload,
        enqueued_at: wire.enqueued_at,
    })
}

/// Parse a queue item and check its tensor against the model input spec.
pub fn decode_job_expecting(bytes: &[u8], spec: &ImageSpec) -> Result<Job, DecodeError> {
    let job = decode_job(bytes)?;
    spec.check(&job.payload)
        .map_err(|source| DecodeError::InvalidTensor {
            id: job.id.clone(),
            source,
        })?;
    Ok(job)
}
