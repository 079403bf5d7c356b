//! HTTP inference engine.
//!
//! Talks to a TensorFlow Serving compatible REST endpoint:
//! `POST {base_url}/v1/models/{model}:predict` with `{"instances": [...]}`,
//! answered by `{"predictions": [[p0, p1, ...], ...]}`. Class probabilities
//! are mapped to labels and cut down to the `top_k` best.

use std::time::Duration;

use async_trait::async_trait;
use batchq_common::{ImageBatch, Prediction};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::InferenceEngine;
use crate::config::EngineConfig;
use crate::error::EngineError;

/// HTTP inference engine.
pub struct HttpEngine {
    http_client: Client,
    base_url: String,
    model: String,
    labels: Vec<String>,
    top_k: usize,
}

impl HttpEngine {
    /// Build an engine from configuration, loading labels if a path is set.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let labels = match &config.labels_path {
            Some(path) => load_labels(path)?,
            None => Vec::new(),
        };
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        Ok(Self::with_client(
            http_client,
            &config.base_url,
            &config.model,
            labels,
            config.top_k,
        ))
    }

    pub fn with_client(
        http_client: Client,
        base_url: &str,
        model: &str,
        labels: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            labels,
            top_k: top_k.max(1),
        }
    }

    fn model_url(&self) -> String {
        format!("{}/v1/models/{}", self.base_url, self.model)
    }
}

// ============================================================================
// Model server API types
// ============================================================================

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

// ============================================================================
// InferenceEngine implementation
// ============================================================================

#[async_trait]
impl InferenceEngine for HttpEngine {
    fn engine_type(&self) -> &'static str {
        "http"
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .http_client
            .get(self.model_url())
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "model endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<Prediction>>, EngineError> {
        if batch.shape.len() < 2 || batch.item_len() == 0 {
            return Err(EngineError::InvalidBatch(format!(
                "batch shape {:?} has no item dimensions",
                batch.shape
            )));
        }

        let values = batch.to_f32();
        let item_len = batch.item_len();
        let item_dims = &batch.shape[1..];
        let instances = values
            .chunks_exact(item_len)
            .map(|item| nest(item, item_dims))
            .collect();

        let url = format!("{}:predict", self.model_url());
        let response = self
            .http_client
            .post(&url)
            .json(&PredictRequest { instances })
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::InferenceFailed(format!("HTTP {}: {}", status, body)));
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        if parsed.predictions.len() != batch.len() {
            return Err(EngineError::ResultCountMismatch {
                expected: batch.len(),
                actual: parsed.predictions.len(),
            });
        }

        Ok(parsed
            .predictions
            .iter()
            .map(|probabilities| rank(probabilities, &self.labels, self.top_k))
            .collect())
    }
}

/// Rebuild a nested JSON array from a flat row-major buffer.
fn nest(values: &[f32], dims: &[usize]) -> Value {
    match dims {
        [] => values.first().map(|v| Value::from(*v)).unwrap_or(Value::Null),
        [_] => Value::Array(values.iter().map(|v| Value::from(*v)).collect()),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product();
            Value::Array(values.chunks_exact(stride).map(|c| nest(c, rest)).collect())
        }
    }
}

/// Keep the `top_k` most probable classes, highest first.
///
/// Classes without a label are named `class_{index}`.
pub fn rank(probabilities: &[f32], labels: &[String], top_k: usize) -> Vec<Prediction> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
        .into_iter()
        .take(top_k)
        .map(|(i, p)| {
            let label = labels
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", i));
            Prediction::new(label, p)
        })
        .collect()
}

/// Read newline-separated labels, skipping blank lines.
pub fn load_labels(path: &str) -> Result<Vec<String>, EngineError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Labels(format!("{}: {}", path, e)))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchq_common::ImagePayload;
    use std::io::Write;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn labels() -> Vec<String> {
        vec!["cat".to_string(), "dog".to_string(), "fox".to_string()]
    }

    fn two_image_batch() -> ImageBatch {
        let a = ImagePayload::from_f32(vec![1, 2, 1], &[0.0, 1.0]).unwrap();
        let b = ImagePayload::from_f32(vec![1, 2, 1], &[2.0, 3.0]).unwrap();
        ImageBatch::stack([&a, &b]).unwrap()
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let ranked = rank(&[0.1, 0.7, 0.2], &labels(), 2);
        assert_eq!(
            ranked,
            vec![Prediction::new("dog", 0.7), Prediction::new("fox", 0.2)]
        );
    }

    #[test]
    fn test_rank_falls_back_to_index_labels() {
        let ranked = rank(&[0.3, 0.6], &[], 5);
        assert_eq!(ranked[0].label, "class_1");
        assert_eq!(ranked[1].label, "class_0");
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_nest_rebuilds_dimensions() {
        let nested = nest(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(nested, serde_json::json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    }

    #[test]
    fn test_load_labels_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tench\n\n  goldfish  \n").unwrap();
        let labels = load_labels(file.path().to_str().unwrap()).unwrap();
        assert_eq!(labels, vec!["tench".to_string(), "goldfish".to_string()]);
    }

    #[test]
    fn test_load_labels_missing_file() {
        assert!(matches!(
            load_labels("/nonexistent/labels.txt"),
            Err(EngineError::Labels(_))
        ));
    }

    #[test]
    fn test_url_normalization() {
        let engine = HttpEngine::with_client(Client::new(), "http://localhost:8501/", "resnet50", vec![], 5);
        assert_eq!(engine.model_url(), "http://localhost:8501/v1/models/resnet50");
    }

    #[tokio::test]
    async fn test_predict_sends_one_request_per_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/resnet50:predict"))
            .and(body_json(serde_json::json!({
                "instances": [[[0.0], [1.0]], [[2.0], [3.0]]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "predictions": [[0.8, 0.1, 0.1], [0.05, 0.15, 0.8]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = HttpEngine::with_client(Client::new(), &server.uri(), "resnet50", labels(), 1);
        let results = engine.predict(&two_image_batch()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].label, "cat");
        assert_eq!(results[1][0].label, "fox");
    }

    #[tokio::test]
    async fn test_predict_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let engine = HttpEngine::with_client(Client::new(), &server.uri(), "resnet50", labels(), 5);
        let err = engine.predict(&two_image_batch()).await.unwrap_err();
        assert!(matches!(err, EngineError::InferenceFailed(msg) if msg.contains("model crashed")));
    }

    #[tokio::test]
    async fn test_predict_result_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "predictions": [[1.0, 0.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let engine = HttpEngine::with_client(Client::new(), &server.uri(), "resnet50", labels(), 5);
        let err = engine.predict(&two_image_batch()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::ResultCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models/resnet50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model_version_status": []
            })))
            .mount(&server)
            .await;

        let engine = HttpEngine::with_client(Client::new(), &server.uri(), "resnet50", labels(), 5);
        assert!(engine.health_check().await.is_ok());

        let missing = HttpEngine::with_client(Client::new(), &server.uri(), "vgg16", labels(), 5);
        assert!(matches!(
            missing.health_check().await,
            Err(EngineError::Unavailable(_))
        ));
    }
}
