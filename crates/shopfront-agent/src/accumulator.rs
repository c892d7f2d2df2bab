//! Reassembly of tool calls streamed as fragments.

use uuid::Uuid;

use shopfront_core::types::ToolCallRequest;
use shopfront_providers::ToolCallFragment;

/// Collects the tool-call fragments of one round, keyed by stream index.
///
/// Calls keep the order in which their index was first seen. Nothing is
/// parsed here; argument text is only interpreted once the round ends.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<(usize, ToolCallRequest)>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ToolCallFragment) {
        match self.calls.iter_mut().find(|(index, _)| *index == fragment.index) {
            Some((_, call)) => {
                if call.name.is_empty() {
                    if let Some(name) = fragment.name {
                        call.name = name;
                    }
                }
                if let Some(arguments) = fragment.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
            None => {
                let call = ToolCallRequest {
                    id: fragment
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                    name: fragment.name.unwrap_or_default(),
                    arguments: fragment.arguments.unwrap_or_default(),
                };
                self.calls.push((fragment.index, call));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.calls.into_iter().map(|(_, call)| call).collect()
    }
}
