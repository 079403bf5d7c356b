//! Raw image tensors as they travel through the queue.
//!
//! A payload is a contiguous little-endian buffer plus the shape and dtype
//! needed to interpret it. Images are carried with a leading batch dimension
//! of one (`[1, height, width, channels]`) so they can be stacked into an
//! [`ImageBatch`] without reshaping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element type of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    #[default]
    Float32,
    Uint8,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::Float32 => 4,
            DType::Uint8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Uint8 => "uint8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(DType::Float32),
            "uint8" => Ok(DType::Uint8),
            other => Err(other.to_string()),
        }
    }
}

/// Problems with a tensor's shape or buffer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    #[error("tensor shape is empty or has a zero dimension: {0:?}")]
    EmptyShape(Vec<usize>),
    #[error("buffer holds {actual} bytes, shape and dtype need {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("expected dtype {expected}, got {actual}")]
    DtypeMismatch { expected: DType, actual: DType },
    #[error("cannot stack an empty batch")]
    EmptyBatch,
    #[error("shape {0:?} is too large to address")]
    TooLarge(Vec<usize>),
}

/// One preprocessed image, ready for inference.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<u8>,
}

impl ImagePayload {
    /// Build a payload, checking that the buffer matches shape and dtype.
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(TensorError::EmptyShape(shape));
        }
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .and_then(|n| n.checked_mul(dtype.size()));
        let Some(expected) = expected else {
            return Err(TensorError::TooLarge(shape));
        };
        if data.len() != expected {
            return Err(TensorError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// Build a float32 payload from host values.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(shape, DType::Float32, data)
    }
}

/// Expected input of the model: `[1, height, width, channels]` of `dtype`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default = "default_height")]
    pub height: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub dtype: DType,
}

impl ImageSpec {
    pub fn shape(&self) -> Vec<usize> {
        vec![1, self.height, self.width, self.channels]
    }

    /// Check a payload against this spec.
    pub fn check(&self, payload: &ImagePayload) -> Result<(), TensorError> {
        if payload.dtype != self.dtype {
            return Err(TensorError::DtypeMismatch {
                expected: self.dtype,
                actual: payload.dtype,
            });
        }
        let expected = self.shape();
        if payload.shape != expected {
            return Err(TensorError::ShapeMismatch {
                expected,
                actual: payload.shape.clone(),
            });
        }
        Ok(())
    }
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            channels: default_channels(),
            dtype: DType::Float32,
        }
    }
}

fn default_width() -> usize {
    224
}
fn default_height() -> usize {
    224
}
fn default_channels() -> usize {
    3
}

/// Images stacked along the leading axis for a single engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    /// `[n, ..item dims]` where `n` is the number of stacked images.
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<u8>,
}

impl ImageBatch {
    /// Stack payloads of identical shape and dtype, keeping their order.
    pub fn stack<'a, I>(payloads: I) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = &'a ImagePayload>,
    {
        let mut iter = payloads.into_iter();
        let first = iter.next().ok_or(TensorError::EmptyBatch)?;
        if first.shape.is_empty() {
            return Err(TensorError::EmptyShape(first.shape.clone()));
        }
        let mut rows = first.shape[0];
        let mut data = first.data.clone();

        for payload in iter {
            if payload.dtype != first.dtype {
                return Err(TensorError::DtypeMismatch {
                    expected: first.dtype,
                    actual: payload.dtype,
                });
            }
            if payload.shape != first.shape {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.clone(),
                    actual: payload.shape.clone(),
                });
            }
            rows += payload.shape[0];
            data.extend_from_slice(&payload.data);
        }

        let mut shape = Vec::with_capacity(first.shape.len());
        shape.push(rows);
        shape.extend_from_slice(&first.shape[1..]);

        Ok(Self {
            shape,
            dtype: first.dtype,
            data,
        })
    }

    /// Number of images in the batch.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements per image.
    pub fn item_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    /// Decode the buffer into `f32` values, widening `uint8` elements.
    pub fn to_f32(&self) -> Vec<f32> {
        match self.dtype {
            DType::Float32 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            DType::Uint8 => self.data.iter().map(|&b| b as f32).collect(),
        }
    }
}
