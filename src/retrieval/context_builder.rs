//! Packs retrieved memories and recent conversation turns into two
//! token-budgeted sections, estimating cost at 0.5 tokens per CJK
//! character and 0.25 tokens per ASCII character.
use crate::retrieval::retriever::RetrievedMemory;
use serde::{Deserialize, Serialize};

const MIN_ELLIPSIS_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuiltContext {
    pub system_prompt: String,
    pub memory_section: String,
    pub recent_turns_section: String,
    pub total_tokens: f64,
    pub memory_count: usize,
    pub turns_count: usize,
}

impl BuiltContext {
    pub fn to_prompt(&self) -> String {
        let mut parts = Vec::new();
        if !self.system_prompt.is_empty() {
            parts.push(self.system_prompt.clone());
        }
        if !self.memory_section.is_empty() {
            parts.push(format!("\n<memories>\n{}\n</memories>", self.memory_section));
        }
        if !self.recent_turns_section.is_empty() {
            parts.push(format!(
                "\n<recent_conversation>\n{}\n</recent_conversation>",
                self.recent_turns_section
            ));
        }
        parts.join("\n")
    }
}

/// A token costs 0.5 for a CJK character, 0.25 for anything else.
fn estimate_tokens(text: &str) -> f64 {
    text.chars()
        .map(|c| if is_cjk(c) { 0.5 } else { 0.25 })
        .sum()
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

pub struct ContextBuilder {
    pub max_tokens: f64,
}

impl ContextBuilder {
    pub fn new(max_tokens: f64) -> Self {
        Self { max_tokens }
    }

    pub fn build(
        &self,
        memories: &[RetrievedMemory],
        recent_turns: &[ConversationTurn],
        system_prompt: Option<&str>,
        memory_ratio: f64,
    ) -> BuiltContext {
        let system_tokens = system_prompt.map(estimate_tokens).unwrap_or(0.0);
        let remaining = (self.max_tokens - system_tokens).max(0.0);
        let memory_budget = remaining * memory_ratio;
        let turns_budget = remaining - memory_budget;

        let memory_section = Self::build_memory_section(memories, memory_budget);
        let recent_section = Self::build_turns_section(recent_turns, turns_budget);

        let total_tokens = system_tokens + estimate_tokens(&memory_section) + estimate_tokens(&recent_section);

        BuiltContext {
            system_prompt: system_prompt.unwrap_or_default().to_string(),
            memory_section,
            recent_turns_section: recent_section,
            total_tokens,
            memory_count: memories.len(),
            turns_count: recent_turns.len(),
        }
    }

    /// Greedy truncation: accept items until the next one would overflow the
    /// budget, then accept a partial tail with an ellipsis only if at least
    /// `MIN_ELLIPSIS_CHARS` characters fit.
    fn build_memory_section(memories: &[RetrievedMemory], budget: f64) -> String {
        if memories.is_empty() {
            return String::new();
        }
        let mut lines = Vec::new();
        let mut used = 0.0;

        for memory in memories {
            let mut content = memory.content.clone();
            if !memory.matched_entities.is_empty() {
                let shown: Vec<&String> = memory.matched_entities.iter().take(3).collect();
                let names = shown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
                content = format!("[related: {names}] {content}");
            }

            let tokens = estimate_tokens(&content);
            if used + tokens > budget {
                let remaining_tokens = budget - used;
                let remaining_chars = (remaining_tokens / 0.25) as usize;
                if remaining_chars >= MIN_ELLIPSIS_CHARS {
                    let tail: String = content.chars().take(remaining_chars).collect();
                    lines.push(format!("{tail}..."));
                }
                break;
            }

            lines.push(format!("\u{2022} {content}"));
            used += tokens;
        }

        lines.join("\n")
    }

    fn build_turns_section(turns: &[ConversationTurn], budget: f64) -> String {
        if turns.is_empty() {
            return String::new();
        }
        let mut selected = Vec::new();
        let mut used = 0.0;

        for turn in turns.iter().rev() {
            let line = format!("{}: {}", turn.role, turn.content);
            let tokens = estimate_tokens(&line);
            if used + tokens > budget {
                break;
            }
            selected.push(line);
            used += tokens;
        }

        selected.reverse();
        selected.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn memory(content: &str) -> RetrievedMemory {
        RetrievedMemory {
            id: "m1".to_string(),
            content: content.to_string(),
            score: 1.0,
            matched_entities: Vec::new(),
            source_stage: "Rerank",
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_inputs_produce_empty_sections() {
        let builder = ContextBuilder::new(1000.0);
        let ctx = builder.build(&[], &[], None, 0.5);
        assert!(ctx.memory_section.is_empty());
        assert!(ctx.recent_turns_section.is_empty());
    }

    #[test]
    fn memory_section_includes_matched_entities_prefix() {
        let builder = ContextBuilder::new(1000.0);
        let mut m = memory("likes coffee");
        m.matched_entities = vec!["Alice".to_string()];
        let ctx = builder.build(&[m], &[], None, 0.5);
        assert!(ctx.memory_section.contains("[related: Alice]"));
    }

    #[test]
    fn recent_turns_keep_most_recent_first_when_truncated() {
        let builder = ContextBuilder::new(10.0);
        let turns = vec![
            ConversationTurn { role: "user".to_string(), content: "a".repeat(100) },
            ConversationTurn { role: "user".to_string(), content: "hi".to_string() },
        ];
        let ctx = builder.build(&[], &turns, None, 0.0);
        assert!(ctx.recent_turns_section.contains("hi"));
    }

    #[test]
    fn overflowing_memory_gets_ellipsis_tail_when_enough_chars_fit() {
        let builder = ContextBuilder::new(40.0);
        let long_memory = memory(&"word ".repeat(100));
        let ctx = builder.build(&[long_memory], &[], None, 1.0);
        assert!(ctx.memory_section.ends_with("..."));
    }
}
