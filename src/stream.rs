//! Accumulator for one in-flight streamed model response
//!
//! A response arrives as an ordered sequence of fragments. Each fragment may
//! carry a text delta and any number of partial tool-call pieces tagged with
//! an index. Pieces for the same index arrive in order (name first, then
//! incremental argument-string chunks) and are concatenated here until the
//! stream completes.

use std::collections::BTreeMap;

use crate::dispatch::ToolInvocation;
use serde_json::Value;
use tracing::warn;

/// One partial tool-call piece carried by a stream fragment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Index keying the invocation this piece belongs to
    pub index: usize,

    /// Tool name, present on the first piece for an index
    pub name: Option<String>,

    /// Argument-string chunk to append
    pub arguments: String,
}

impl ToolCallDelta {
    /// Create a piece carrying a tool name
    pub fn named(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: Some(name.into()),
            arguments: String::new(),
        }
    }

    /// Create a piece carrying an argument chunk
    pub fn arguments(index: usize, chunk: impl Into<String>) -> Self {
        Self {
            index,
            name: None,
            arguments: chunk.into(),
        }
    }

    /// Attach an argument chunk to this piece
    pub fn with_arguments(mut self, chunk: impl Into<String>) -> Self {
        self.arguments = chunk.into();
        self
    }
}

/// One incremental unit of a streamed model response
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamFragment {
    /// Display-text delta, if any
    pub text_delta: Option<String>,

    /// Partial tool-call pieces carried by this fragment
    pub tool_deltas: Vec<ToolCallDelta>,
}

impl StreamFragment {
    /// Create a fragment carrying only text
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: Some(delta.into()),
            tool_deltas: Vec::new(),
        }
    }

    /// Create a fragment carrying only tool-call pieces
    pub fn tool_calls(deltas: Vec<ToolCallDelta>) -> Self {
        Self {
            text_delta: None,
            tool_deltas: deltas,
        }
    }
}

/// A tool call under reassembly, keyed by index in `PendingStream`
#[derive(Clone, Debug, Default)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

/// Mutable accumulator for one in-flight model response
///
/// Lifetime: one stream. The orchestrator holds at most one at a time.
#[derive(Clone, Debug, Default)]
pub struct PendingStream {
    text: String,
    partials: BTreeMap<usize, PartialToolCall>,
}

impl PendingStream {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the accumulator
    pub fn feed(&mut self, fragment: &StreamFragment) {
        if let Some(delta) = &fragment.text_delta {
            self.text.push_str(delta);
        }
        for piece in &fragment.tool_deltas {
            let partial = self.partials.entry(piece.index).or_default();
            if let Some(name) = &piece.name {
                partial.name.push_str(name);
            }
            partial.arguments.push_str(&piece.arguments);
        }
    }

    /// Accumulated display text so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of tool calls under reassembly
    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }

    /// Finish the stream, yielding the full text and the reconstructed
    /// invocations in index order
    ///
    /// Indices whose argument string does not parse as a JSON object are
    /// discarded with a warning, not retried. An empty argument string is
    /// treated as an empty object so that argument-free tools survive.
    pub fn finish(self) -> (String, Vec<ToolInvocation>) {
        let mut invocations = Vec::new();

        for (index, partial) in self.partials {
            if partial.name.is_empty() {
                warn!("Discarding tool call at index {}: no name received", index);
                continue;
            }

            let raw = partial.arguments.trim();
            let parsed: Value = if raw.is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(raw) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(
                            "Discarding tool call '{}' at index {}: unparsable arguments: {}",
                            partial.name, index, e
                        );
                        continue;
                    }
                }
            };

            if !parsed.is_object() {
                warn!(
                    "Discarding tool call '{}' at index {}: arguments are not an object",
                    partial.name, index
                );
                continue;
            }

            invocations.push(ToolInvocation {
                name: partial.name,
                arguments: parsed,
            });
        }

        (self.text, invocations)
    }
}
