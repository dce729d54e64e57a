//! Detailed per-node report of a finished prompt.
//!
//! Combines the submitted workflow (class types, inputs, links) with the
//! history record (outputs, timings) so a log reader can see what every
//! output node consumed and produced.

use std::collections::{BTreeMap, BTreeSet};

use comfyjob_comfyui::history::HistoryRecord;
use serde_json::Value;

/// Output keys whose lists are summarized by count only.
const COUNTED_OUTPUT_KEYS: &[&str] = &["images", "image", "latents", "tensor"];

/// One workflow input of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    /// `[node_id, output_index]` reference to another node.
    Link { node: String, output: Value },
    Literal(Value),
}

/// Report row for a node that produced outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub node_id: String,
    pub class_type: String,
    pub inputs: Vec<(String, NodeInput)>,
    /// Output key and a short description of its value.
    pub outputs: Vec<(String, String)>,
    /// Nodes consuming this node's outputs.
    pub downstream: Vec<String>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// ComfyUI's `status.status_str` (`success`, `error`), when reported.
    pub status: Option<String>,
    pub workflow_nodes: usize,
    pub output_nodes: usize,
    pub timed_nodes: usize,
    pub nodes: Vec<NodeReport>,
}

/// Build the report for `record`, using the workflow as submitted.
pub fn build_report(workflow: &Value, record: &HistoryRecord) -> ExecutionReport {
    let empty = serde_json::Map::new();
    let nodes = workflow.as_object().unwrap_or(&empty);
    let consumers = reverse_links(nodes);

    let reports = record
        .outputs
        .iter()
        .map(|(node_id, output)| {
            let node = nodes.get(node_id);
            let class_type = node
                .and_then(|n| n.get("class_type"))
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();

            let inputs = node
                .and_then(|n| n.get("inputs"))
                .and_then(Value::as_object)
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|(key, value)| (key.clone(), classify_input(value)))
                        .collect()
                })
                .unwrap_or_default();

            let mut outputs = Vec::new();
            if !output.images.is_empty() {
                outputs.push(("images".to_string(), format!("{} item(s)", output.images.len())));
            }
            outputs.extend(
                output
                    .extra
                    .iter()
                    .map(|(key, value)| (key.clone(), describe_output(key, value))),
            );

            NodeReport {
                node_id: node_id.clone(),
                class_type,
                inputs,
                outputs,
                downstream: consumers
                    .get(node_id.as_str())
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default(),
                duration_secs: record.execution_time(node_id),
            }
        })
        .collect();

    ExecutionReport {
        status: record
            .status
            .as_ref()
            .and_then(|status| status.get("status_str"))
            .and_then(Value::as_str)
            .map(str::to_string),
        workflow_nodes: nodes.len(),
        output_nodes: record.outputs.len(),
        timed_nodes: record.timings.len(),
        nodes: reports,
    }
}

impl ExecutionReport {
    /// Emit the report through `tracing`.
    pub fn log(&self, prompt_id: &str) {
        tracing::info!(
            prompt_id = %prompt_id,
            status = self.status.as_deref().unwrap_or("unknown"),
            workflow_nodes = self.workflow_nodes,
            output_nodes = self.output_nodes,
            timed_nodes = self.timed_nodes,
            "Execution report",
        );

        for node in &self.nodes {
            let inputs: Vec<String> = node
                .inputs
                .iter()
                .map(|(key, input)| match input {
                    NodeInput::Link { node, output } => format!("{key} <- node {node} (output {output})"),
                    NodeInput::Literal(value) => format!("{key} = {value}"),
                })
                .collect();
            let outputs: Vec<String> = node
                .outputs
                .iter()
                .map(|(key, summary)| format!("{key}: {summary}"))
                .collect();

            tracing::info!(
                prompt_id = %prompt_id,
                node_id = %node.node_id,
                class_type = %node.class_type,
                inputs = ?inputs,
                outputs = ?outputs,
                downstream = ?node.downstream,
                duration_secs = node.duration_secs,
                "Node output",
            );
        }
    }
}

fn classify_input(value: &Value) -> NodeInput {
    match value.as_array().map(Vec::as_slice) {
        Some([source, output]) => NodeInput::Link {
            node: node_ref(source),
            output: output.clone(),
        },
        _ => NodeInput::Literal(value.clone()),
    }
}

/// Map each node id to the set of nodes that take one of its outputs.
fn reverse_links(nodes: &serde_json::Map<String, Value>) -> BTreeMap<String, BTreeSet<String>> {
    let mut consumers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (node_id, node) in nodes {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };
        for value in inputs.values() {
            if let NodeInput::Link { node: source, .. } = classify_input(value) {
                consumers.entry(source).or_default().insert(node_id.clone());
            }
        }
    }
    consumers
}

fn node_ref(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe_output(key: &str, value: &Value) -> String {
    match value {
        Value::Array(items) if COUNTED_OUTPUT_KEYS.contains(&key.to_ascii_lowercase().as_str()) => {
            format!("{} item(s)", items.len())
        }
        Value::Array(items) => {
            let kinds: BTreeSet<&str> = items.iter().map(json_type).collect();
            let kinds: Vec<&str> = kinds.into_iter().collect();
            format!("{} item(s) ({})", items.len(), kinds.join(", "))
        }
        other => json_type(other).to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
