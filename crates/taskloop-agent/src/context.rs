//! Context window management with token counting

use taskloop_llm::{ContentBlock, LlmContent, LlmMessage};

const CHARS_PER_TOKEN: f32 = 4.0;
const MAX_RESULT_CHARS: usize = 50_000;

pub struct ContextManager {
    max_tokens: usize,
    system_tokens: usize,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            system_tokens: 0,
        }
    }

    pub fn estimate_tokens(text: &str) -> usize {
        (text.len() as f32 / CHARS_PER_TOKEN).ceil() as usize
    }

    pub fn message_tokens(message: &LlmMessage) -> usize {
        let content_tokens = match &message.content {
            LlmContent::Text(s) => Self::estimate_tokens(s),
            LlmContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => Self::estimate_tokens(text),
                    ContentBlock::ToolUse { name, input, .. } => {
                        Self::estimate_tokens(name) + Self::estimate_tokens(&input.to_string())
                    }
                    ContentBlock::ToolResult { content, .. } => Self::estimate_tokens(content),
                })
                .sum(),
        };
        content_tokens + 10
    }

    pub fn set_system(&mut self, system: &str) {
        self.system_tokens = Self::estimate_tokens(system);
    }

    pub fn calculate_total(&self, messages: &[LlmMessage]) -> usize {
        let message_tokens: usize = messages.iter().map(Self::message_tokens).sum();
        self.system_tokens + message_tokens
    }

    /// Drop the oldest messages until the window fits 75% of the budget.
    ///
    /// The message at `pinned` (the task) and the newest message are never
    /// removed. Tool-result messages go together with the turn that requested
    /// them. `pinned` is shifted to follow removals. Returns how many messages
    /// were dropped.
    pub fn compact(&self, messages: &mut Vec<LlmMessage>, pinned: &mut usize) -> usize {
        if messages.is_empty() || self.calculate_total(messages) <= self.max_tokens {
            return 0;
        }
        let target = (self.max_tokens as f32 * 0.75) as usize;
        let mut removed = 0;
        while messages.len() > 2 && self.calculate_total(messages) > target {
            let start = if *pinned == 0 { 1 } else { 0 };
            let mut end = start + 1;
            while end < messages.len() && messages[end].has_tool_results() {
                end += 1;
            }
            if end >= messages.len() || (start < *pinned && end > *pinned) {
                break;
            }
            messages.drain(start..end);
            removed += end - start;
            if start < *pinned {
                *pinned -= end - start;
            }
        }
        if removed > 0 {
            tracing::info!(
                "Compacted context: {} messages, ~{} tokens",
                messages.len(),
                self.calculate_total(messages)
            );
        }
        removed
    }
}

/// Cap a tool result before it enters the context window.
pub fn truncate_result(text: String) -> String {
    if text.len() <= MAX_RESULT_CHARS {
        return text;
    }
    let mut cut = MAX_RESULT_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...\n[truncated, {} total chars]", &text[..cut], text.len())
}
