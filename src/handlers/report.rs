//! # Batch Report
//!
//! Folds the per-file outcomes of one `/transcribe` request into a single
//! response, so one bad file never hides its siblings' transcripts.
//!
//! ## Response body:
//! An object keyed by the client's filename. Repeated filenames get `#2`,
//! `#3`, ... in upload order.
//! ```json
//! {
//!   "meeting.mp3": { "text": "good morning", "result": [ ... ] },
//!   "meeting.mp3#2": { "error": { "type": "validation_error", "message": "..." } }
//! }
//! ```
//!
//! ## Status code:
//! - **200**: every file succeeded
//! - **207**: some succeeded, some failed
//! - all failed: their common status if they agree, otherwise 500 when any
//!   failure is a server error, otherwise 400

use crate::error::FileError;
use crate::transcription::Transcript;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// What happened to one uploaded file.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub result: Result<Transcript, FileError>,
}

/// Per-file results ready to be sent.
#[derive(Debug)]
pub struct BatchReport {
    body: Map<String, Value>,
    status: StatusCode,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<FileOutcome>) -> Self {
        let keys = unique_keys(outcomes.iter().map(|outcome| outcome.filename.as_str()));

        let mut body = Map::new();
        let mut succeeded = 0usize;
        let mut failures = Vec::new();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            let value = match file_entry(outcome.result) {
                Ok(value) => {
                    succeeded += 1;
                    value
                }
                Err(err) => {
                    failures.push(err.status_code());
                    json!({
                        "error": {
                            "type": err.error_type(),
                            "message": err.to_string()
                        }
                    })
                }
            };
            body.insert(key, value);
        }

        Self {
            status: overall_status(succeeded, &failures),
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse::build(self.status).json(Value::Object(self.body))
    }
}

/// JSON for a successful file; a transcript that cannot be serialized fails that file.
fn file_entry<T: Serialize>(result: Result<T, FileError>) -> Result<Value, FileError> {
    result.and_then(|transcript| serde_json::to_value(transcript).map_err(FileError::from))
}

/// Response keys for `names`, in order, with repeats numbered from `#2`.
fn unique_keys<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut keys = Vec::new();
    for name in names {
        let mut key = name.to_string();
        let mut n = 2;
        while taken.contains(&key) {
            key = format!("{}#{}", name, n);
            n += 1;
        }
        taken.insert(key.clone());
        keys.push(key);
    }
    keys
}

fn overall_status(succeeded: usize, failures: &[StatusCode]) -> StatusCode {
    match failures.first() {
        None => StatusCode::OK,
        Some(_) if succeeded > 0 => StatusCode::MULTI_STATUS,
        Some(first) if failures.iter().all(|status| status == first) => *first,
        Some(_) if failures.iter().any(|status| status.is_server_error()) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Some(_) => StatusCode::BAD_REQUEST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::staging::transcoder::TranscodeError;
    use std::collections::HashMap;

    fn ok(filename: &str, text: &str) -> FileOutcome {
        FileOutcome {
            filename: filename.to_string(),
            result: Ok(Transcript {
                text: text.to_string(),
                result: Vec::new(),
            }),
        }
    }

    fn failed(filename: &str, err: FileError) -> FileOutcome {
        FileOutcome {
            filename: filename.to_string(),
            result: Err(err),
        }
    }

    fn stereo() -> FileError {
        ValidationError::Channels { found: 2 }.into()
    }

    #[test]
    fn test_unique_keys() {
        let keys = unique_keys(["a.wav", "b.wav", "a.wav", "a.wav#2", "a.wav"].into_iter());
        assert_eq!(keys, vec!["a.wav", "b.wav", "a.wav#2", "a.wav#2#2", "a.wav#3"]);
    }

    #[test]
    fn test_all_success_is_ok() {
        let report = BatchReport::from_outcomes(vec![ok("a.wav", "one"), ok("a.wav", "two")]);
        assert_eq!(report.status(), StatusCode::OK);
        assert_eq!(report.body["a.wav"], json!({ "text": "one" }));
        assert_eq!(report.body["a.wav#2"], json!({ "text": "two" }));
    }

    #[test]
    fn test_mixed_is_multi_status() {
        let report = BatchReport::from_outcomes(vec![ok("good.wav", "hi"), failed("bad.wav", stereo())]);
        assert_eq!(report.status(), StatusCode::MULTI_STATUS);
        assert_eq!(report.body["good.wav"]["text"], "hi");
        assert_eq!(report.body["bad.wav"]["error"]["type"], "validation_error");
        assert!(report.body["bad.wav"]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("mono"));
    }

    #[test]
    fn test_unserializable_result_is_a_failure() {
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), "not a string key");

        let err = file_entry(Ok(map)).unwrap_err();
        assert!(matches!(err, FileError::Serialize(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "serialization_error");
    }

    #[test]
    fn test_all_failed_status() {
        let report = BatchReport::from_outcomes(vec![failed("a", stereo()), failed("b", stereo())]);
        assert_eq!(report.status(), StatusCode::BAD_REQUEST);

        let rejected = || {
            FileError::from(TranscodeError::Failed {
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            })
        };
        let report = BatchReport::from_outcomes(vec![failed("a", rejected())]);
        assert_eq!(report.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let report = BatchReport::from_outcomes(vec![failed("a", rejected()), failed("b", stereo())]);
        assert_eq!(report.status(), StatusCode::BAD_REQUEST);

        let storage = FileError::Storage(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let report = BatchReport::from_outcomes(vec![failed("a", storage), failed("b", stereo())]);
        assert_eq!(report.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
