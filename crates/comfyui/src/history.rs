//! Typed view of the `/history/{prompt_id}` response.
//!
//! ComfyUI keys the response by prompt id:
//! `{"<prompt_id>": {"outputs": {"<node_id>": {"images": [...]}}, "timings": {...}}}`.
//! Unknown keys are kept as raw JSON so reports can list them. Custom
//! nodes put arbitrary entries under `images`; entries that are not a
//! file reference are dropped instead of failing the whole record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// History of a single prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    /// Produced artifacts per node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    /// Execution timings per node id.
    #[serde(default)]
    pub timings: BTreeMap<String, Value>,
    /// Execution status block (`status_str`, `completed`, `messages`).
    #[serde(default)]
    pub status: Option<Value>,
}

/// Output of one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default, deserialize_with = "file_list")]
    pub images: Vec<OutputFile>,
    /// Any other output lists (`gifs`, `text`, `latents`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A file written by ComfyUI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl OutputFile {
    /// Path of the file relative to the ComfyUI output directory.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.subfolder).join(&self.filename)
    }

    /// Whether the file was saved to the output directory. Entries
    /// without a `type` are assumed saved.
    pub fn is_saved(&self) -> bool {
        self.kind.as_deref().map_or(true, |kind| kind == "output")
    }
}

/// Keep the entries of an `images` list that decode as [`OutputFile`].
fn file_list<'de, D>(deserializer: D) -> Result<Vec<OutputFile>, D::Error>
where
    D: Deserializer<'de>,
{
    let files = match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping output entry that is not a file");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(files)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl HistoryRecord {
    /// Execution time of a node in seconds.
    ///
    /// Accepts both `{"execution_time": 1.5}` and a bare number.
    pub fn execution_time(&self, node_id: &str) -> Option<f64> {
        match self.timings.get(node_id)? {
            Value::Number(n) => n.as_f64(),
            other => other.get("execution_time").and_then(Value::as_f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SAMPLE: &str = r#"{
        "abc": {
            "prompt": [1, "abc", {}],
            "outputs": {
                "9": {
                    "images": [
                        {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}
                    ]
                },
                "12": {"gifs": [{"filename": "clip.webm", "subfolder": "video"}]}
            },
            "timings": {
                "9": {"execution_time": 0.25},
                "12": 3.5
            },
            "status": {"status_str": "success", "completed": true}
        }
    }"#;

    fn record(json: Value) -> HistoryRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn parses_outputs_and_timings() {
        let history: HashMap<String, HistoryRecord> = serde_json::from_str(SAMPLE).unwrap();
        let record = &history["abc"];

        assert_eq!(record.outputs.len(), 2);
        assert_eq!(record.outputs["9"].images[0].filename, "ComfyUI_00001_.png");
        assert!(record.outputs["9"].images[0].is_saved());
        assert!(record.outputs["12"].images.is_empty());
        assert!(record.outputs["12"].extra.contains_key("gifs"));

        assert_eq!(record.execution_time("9"), Some(0.25));
        assert_eq!(record.execution_time("12"), Some(3.5));
        assert_eq!(record.execution_time("1"), None);
    }

    #[test]
    fn record_without_outputs_defaults_to_empty() {
        let record = record(serde_json::json!({}));
        assert!(record.outputs.is_empty());
        assert!(record.timings.is_empty());
    }

    #[test]
    fn odd_image_entries_are_dropped() {
        let record = record(serde_json::json!({
            "outputs": {
                "1": { "images": [
                    { "filename": "keep.png", "subfolder": null, "type": "output" },
                    { "subfolder": null, "type": "temp" },
                    "not-an-object"
                ] },
                "2": { "images": { "unexpected": true } }
            }
        }));

        assert_eq!(record.outputs.len(), 2);
        assert_eq!(record.outputs["1"].images.len(), 1);
        assert_eq!(record.outputs["1"].images[0].relative_path(), PathBuf::from("keep.png"));
        assert!(record.outputs["2"].images.is_empty());
    }

    #[test]
    fn saved_flag_follows_type() {
        let file = |kind: Option<&str>| OutputFile {
            filename: "a.png".into(),
            subfolder: String::new(),
            kind: kind.map(str::to_string),
        };
        assert!(file(Some("output")).is_saved());
        assert!(file(None).is_saved());
        assert!(!file(Some("temp")).is_saved());
    }

    #[test]
    fn relative_path_joins_subfolder() {
        let file = OutputFile {
            filename: "out.png".into(),
            subfolder: "batch".into(),
            kind: None,
        };
        assert_eq!(file.relative_path(), PathBuf::from("batch/out.png"));
    }
}
