//! Page capture files: one page's recorded driver output.
//!
//! The CLI replays captures through a page session in the order the driver
//! emitted them.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::engine::events::FrameSnapshot;
use crate::error::AnalyzerError;

fn default_true() -> bool {
    true
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCapture {
    pub page_url: String,
    #[serde(default)]
    pub frames: Vec<FrameSnapshot>,
    /// Raw protocol events; each is decoded individually so one bad event
    /// does not reject the whole capture.
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default = "default_true")]
    pub navigation_settled: bool,
    #[serde(default)]
    pub navigation_error: Option<String>,
    #[serde(default = "empty_array")]
    pub technology_data: Value,
    #[serde(default = "empty_object")]
    pub library_matches: Value,
}

impl PageCapture {
    pub fn from_json(json: &str) -> Result<Self, AnalyzerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self, AnalyzerError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AnalyzerError::Capture {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&json).map_err(|e| AnalyzerError::Capture {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let capture = PageCapture::from_json(r#"{"pageUrl": "https://a.test/"}"#).unwrap();
        assert!(capture.navigation_settled);
        assert!(capture.events.is_empty());
        assert_eq!(capture.technology_data, serde_json::json!([]));
        assert_eq!(capture.library_matches, serde_json::json!({}));
    }

    #[test]
    fn test_bad_events_do_not_reject_capture() {
        let capture = PageCapture::from_json(
            r#"{"pageUrl": "https://a.test/", "events": [{"type": "bogus"}, 42]}"#,
        )
        .unwrap();
        assert_eq!(capture.events.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = PageCapture::load(Path::new("/nonexistent/capture.json"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CAPTURE_ERROR");
    }
}
