//! DetectorClient - remote YOLO service adapter
//!
//! ## Responsibilities
//!
//! - Send a frame to the detection service (multipart field `file`)
//! - Parse both response shapes the service family emits:
//!   `{detections: [{class_name|label, confidence, bbox}], count}` and
//!   `{is_dirty, confidence}`
//! - Reduce raw detections to a dirty/clean verdict with a confidence
//!   threshold and a configurable label vocabulary
//!
//! Transport errors and non-2xx responses are `Err`; an unreadable body
//! from a successful call is a clean verdict.

use crate::error::{Error, Result};
use crate::interfaces::Detector;
use crate::models::ImageKind;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default confidence threshold
pub const DEFAULT_CONF_THRESHOLD: f64 = 0.25;

/// Case-insensitive substrings that mark a label as "dirty floor"
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyVocabulary {
    terms: Vec<String>,
}

impl Default for DirtyVocabulary {
    fn default() -> Self {
        Self {
            terms: vec!["dirty".to_string(), "kotor".to_string()],
        }
    }
}

impl DirtyVocabulary {
    /// Parse a comma separated list; empty input yields the default vocabulary
    pub fn from_csv(csv: &str) -> Self {
        let terms: Vec<String> = csv
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if terms.is_empty() {
            Self::default()
        } else {
            Self { terms }
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.terms.iter().any(|t| label.contains(t.as_str()))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Detection endpoint, e.g. `http://yolo:8001/detect`
    pub service_url: Option<String>,
    pub threshold: f64,
    pub vocabulary: DirtyVocabulary,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            threshold: DEFAULT_CONF_THRESHOLD,
            vocabulary: DirtyVocabulary::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One object reported by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` when the model reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

/// Dirty/clean verdict for one frame
///
/// `is_dirty` is true iff `confidence > 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionVerdict {
    pub is_dirty: bool,
    pub confidence: f64,
    pub detections: Vec<Detection>,
}

impl DetectionVerdict {
    pub fn clean() -> Self {
        Self {
            is_dirty: false,
            confidence: 0.0,
            detections: Vec::new(),
        }
    }
}

/// Reduce raw detections to a verdict
///
/// A detection qualifies when `confidence >= threshold` and its label matches
/// the vocabulary. Confidence is the maximum over qualifying detections.
pub fn evaluate(
    detections: Vec<Detection>,
    threshold: f64,
    vocabulary: &DirtyVocabulary,
) -> DetectionVerdict {
    let max_conf = detections
        .iter()
        .filter(|d| d.confidence.is_finite())
        .filter(|d| d.confidence >= threshold && vocabulary.matches(&d.label))
        .map(|d| d.confidence.clamp(0.0, 1.0))
        .fold(0.0_f64, f64::max);

    DetectionVerdict {
        is_dirty: max_conf > 0.0,
        confidence: max_conf,
        detections,
    }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    class_name: Option<String>,
    label: Option<String>,
    name: Option<String>,
    confidence: Option<f64>,
    conf: Option<f64>,
    bbox: Option<Vec<f64>>,
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        Detection {
            label: raw
                .class_name
                .or(raw.label)
                .or(raw.name)
                .unwrap_or_default(),
            confidence: raw.confidence.or(raw.conf).unwrap_or(0.0),
            bbox: raw.bbox,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResponse {
    Detections { detections: Vec<RawDetection> },
    Verdict { is_dirty: bool, confidence: Option<f64> },
}

/// Parse a detector response body into raw detections
///
/// The `{is_dirty, confidence}` shape becomes a single "dirty" detection.
/// Unreadable bodies yield `None`.
pub fn parse_detections(body: &[u8]) -> Option<Vec<Detection>> {
    match serde_json::from_slice::<RawResponse>(body).ok()? {
        RawResponse::Detections { detections } => {
            Some(detections.into_iter().map(Detection::from).collect())
        }
        RawResponse::Verdict {
            is_dirty: true,
            confidence,
        } => Some(vec![Detection {
            label: "dirty".to_string(),
            confidence: confidence.unwrap_or(0.0),
            bbox: None,
        }]),
        RawResponse::Verdict { .. } => Some(Vec::new()),
    }
}

/// Remote detector client
pub struct DetectorClient {
    client: reqwest::Client,
    url: String,
    threshold: f64,
    vocabulary: DirtyVocabulary,
}

impl DetectorClient {
    /// Create a client for `url`
    pub fn new(
        url: String,
        threshold: f64,
        vocabulary: DirtyVocabulary,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            threshold,
            vocabulary,
        })
    }

    /// Build from config; `None` when no endpoint is configured
    pub fn from_config(config: &DetectorConfig) -> Result<Option<Self>> {
        match &config.service_url {
            Some(url) => Self::new(
                url.clone(),
                config.threshold,
                config.vocabulary.clone(),
                config.timeout,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one image and return the verdict
    pub async fn detect_image(&self, image: &[u8]) -> Result<DetectionVerdict> {
        let kind = ImageKind::sniff(image).unwrap_or(ImageKind::JPEG);
        let part = Part::bytes(image.to_vec())
            .file_name(format!("frame.{}", kind.extension))
            .mime_str(kind.mime_type)?;
        let form = Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Detector(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detector(format!(
                "detector returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Detector(format!("response read failed: {}", e)))?;

        let verdict = match parse_detections(&body) {
            Some(detections) => evaluate(detections, self.threshold, &self.vocabulary),
            None => {
                tracing::warn!(
                    body_len = body.len(),
                    "Unparseable detector response, treating as clean"
                );
                DetectionVerdict::clean()
            }
        };

        tracing::debug!(
            is_dirty = verdict.is_dirty,
            confidence = verdict.confidence,
            detections = verdict.detections.len(),
            "Detector verdict"
        );

        Ok(verdict)
    }
}

impl Detector for DetectorClient {
    fn detect<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<DetectionVerdict>> {
        self.detect_image(image).boxed()
    }
}
