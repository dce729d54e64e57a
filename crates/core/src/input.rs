//! Job payload parsing and validation.
//!
//! A job arrives as an envelope `{ "id": ..., "input": ... }`. The input
//! may be a JSON object or the same object pre-serialized as a string.
//! [`JobInput::validate`] normalizes both forms and checks the shape
//! before anything touches the network.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job as handed over by the ingestion layer.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    /// Identifier assigned by the ingestion layer; scopes storage keys.
    pub id: String,
    /// Raw payload, validated by [`JobInput::validate`].
    #[serde(default)]
    pub input: Option<Value>,
}

/// An input image to place in the ComfyUI input directory before the
/// workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    /// File name the workflow refers to (e.g. in a `LoadImage` node).
    pub name: String,
    /// Base64-encoded file contents.
    pub image: String,
}

/// A validated job payload.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    /// ComfyUI API-format workflow, passed through untouched.
    pub workflow: Value,
    pub images: Vec<ImageInput>,
}

/// Reasons a job payload is rejected.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Please provide input")]
    MissingInput,

    #[error("Invalid JSON format in input")]
    InvalidFormat(#[source] serde_json::Error),

    #[error("Missing '{0}' parameter")]
    MissingField(&'static str),

    #[error("'images' must be a list of objects with 'name' and 'image' keys")]
    MalformedImages,
}

impl JobInput {
    /// Validate a raw payload.
    ///
    /// `images` is optional; when present (and not `null`) it must be an
    /// array whose every element carries string `name` and `image` keys.
    pub fn validate(payload: Option<&Value>) -> Result<Self, InputError> {
        let parsed;
        let payload = match payload {
            None | Some(Value::Null) => return Err(InputError::MissingInput),
            Some(Value::String(text)) => {
                parsed = serde_json::from_str::<Value>(text).map_err(InputError::InvalidFormat)?;
                &parsed
            }
            Some(value) => value,
        };

        let workflow = match payload.get("workflow") {
            None | Some(Value::Null) => return Err(InputError::MissingField("workflow")),
            Some(workflow) => workflow.clone(),
        };

        let images = match payload.get("images") {
            None | Some(Value::Null) => Vec::new(),
            Some(images @ Value::Array(_)) => serde_json::from_value(images.clone())
                .map_err(|_| InputError::MalformedImages)?,
            Some(_) => return Err(InputError::MalformedImages),
        };

        Ok(Self { workflow, images })
    }

    /// Number of nodes in the workflow graph.
    pub fn node_count(&self) -> usize {
        self.workflow.as_object().map_or(0, |nodes| nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_workflow_without_images() {
        let payload = json!({ "workflow": { "1": { "class_type": "SaveImage", "inputs": {} } } });
        let input = JobInput::validate(Some(&payload)).unwrap();
        assert!(input.images.is_empty());
        assert_eq!(input.node_count(), 1);
    }

    #[test]
    fn accepts_serialized_payload() {
        let payload = Value::String(r#"{"workflow":{"3":{}},"images":[{"name":"a.png","image":"AAAA"}]}"#.into());
        let input = JobInput::validate(Some(&payload)).unwrap();
        assert_eq!(
            input.images,
            vec![ImageInput {
                name: "a.png".into(),
                image: "AAAA".into()
            }]
        );
    }

    #[test]
    fn rejects_missing_payload() {
        assert_matches!(JobInput::validate(None), Err(InputError::MissingInput));
        assert_matches!(JobInput::validate(Some(&Value::Null)), Err(InputError::MissingInput));
    }

    #[test]
    fn rejects_unparsable_text() {
        let payload = Value::String("{not json".into());
        assert_matches!(JobInput::validate(Some(&payload)), Err(InputError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_missing_workflow() {
        for payload in [json!({}), json!({ "workflow": null }), json!({ "images": [] })] {
            let err = JobInput::validate(Some(&payload)).unwrap_err();
            assert_matches!(err, InputError::MissingField("workflow"));
            assert_eq!(err.to_string(), "Missing 'workflow' parameter");
        }
    }

    #[test]
    fn rejects_image_without_name_or_data() {
        let payloads = [
            json!({ "workflow": {}, "images": [{ "image": "AAAA" }] }),
            json!({ "workflow": {}, "images": [{ "name": "a.png" }] }),
            json!({ "workflow": {}, "images": [{ "name": "a.png", "image": "AAAA" }, {}] }),
            json!({ "workflow": {}, "images": "a.png" }),
        ];
        for payload in payloads {
            assert_matches!(
                JobInput::validate(Some(&payload)),
                Err(InputError::MalformedImages)
            );
        }
    }

    #[test]
    fn null_images_are_treated_as_absent() {
        let payload = json!({ "workflow": {}, "images": null });
        assert!(JobInput::validate(Some(&payload)).unwrap().images.is_empty());
    }

    #[test]
    fn job_envelope_tolerates_missing_input() {
        let job: Job = serde_json::from_value(json!({ "id": "job-1" })).unwrap();
        assert_eq!(job.id, "job-1");
        assert!(job.input.is_none());
    }
}
