//! Prompt construction and parsing of model output into samples.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::ProviderError;
use crate::catalog::{SampleType, Topic};
use crate::types::{BatchId, GeneratedSample};

const DEFAULT_JURISDICTION: &str = "uk";

/// Everything a provider needs to produce one sample.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub topic: Topic,
    pub sample_type: &'static SampleType,
    pub reasoning_instruction: Option<String>,
    pub batch_id: Option<BatchId>,
    pub jurisdiction: String,
}

impl PromptContext {
    pub fn new(
        topic: Topic,
        sample_type: &'static SampleType,
        reasoning_instruction: Option<String>,
        batch_id: Option<BatchId>,
    ) -> Self {
        Self {
            topic,
            sample_type,
            reasoning_instruction,
            batch_id,
            jurisdiction: DEFAULT_JURISDICTION.to_string(),
        }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are an expert legal educator writing training data for legal reasoning models. \
             Write a {name} sample: {description}. Focus: {focus}. \
             Respond with a single JSON object and nothing else.",
            name = self.sample_type.name,
            description = self.sample_type.description,
            focus = self.sample_type.focus,
        )
    }

    pub fn user_prompt(&self) -> String {
        let mut prompt = format!(
            "Practice area: {area}\nTopic: {topic}\nDifficulty: {difficulty}\nJurisdiction: {jurisdiction}\n\n\
             Return JSON with these string fields:\n\
             - \"question\": a realistic legal question\n\
             - \"answer\": a thorough answer citing relevant authority\n\
             - \"reasoning\": numbered reasoning steps leading to the answer\n\
             - \"case_citation\": the principal cases or statutes relied on\n",
            area = self.topic.practice_area,
            topic = self.topic.topic,
            difficulty = self.topic.difficulty,
            jurisdiction = self.jurisdiction,
        );
        if let Some(instruction) = self.reasoning_instruction.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\nAdditional reasoning requirements: ");
            prompt.push_str(instruction.trim());
            prompt.push('\n');
        }
        prompt
    }

    /// Rough token estimate used by the rate limiter before the provider reports real usage.
    pub fn estimated_tokens(&self, expected_completion_tokens: u32) -> u32 {
        let chars = self.system_prompt().len() + self.user_prompt().len();
        u32::try_from(chars.div_ceil(4))
            .unwrap_or(u32::MAX)
            .saturating_add(expected_completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    reasoning: serde_json::Value,
    #[serde(default)]
    case_citation: serde_json::Value,
}

/// Flatten a string-or-list field into text.
fn text_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(text_field)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Remove `<thinking>`/`<think>` blocks emitted by reasoning models.
fn strip_thinking(content: &str) -> String {
    let mut out = content.to_string();
    for (open, close) in [("<thinking>", "</thinking>"), ("<think>", "</think>")] {
        while let Some(start) = out.find(open) {
            match out[start..].find(close) {
                Some(end) => out.replace_range(start..start + end + close.len(), ""),
                None => {
                    out.truncate(start);
                    break;
                }
            }
        }
    }
    out
}

/// Return the first balanced `{...}` object in `content`, ignoring braces inside strings.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse model output into a sample.
///
/// Output that does not contain a complete sample is `Transient`: another attempt usually works.
pub fn parse_sample(
    content: &str,
    context: &PromptContext,
    provider: &str,
    model: &str,
) -> Result<GeneratedSample, ProviderError> {
    let cleaned = strip_thinking(content);
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| ProviderError::transient(format!("{model} returned no JSON object")))?;
    let raw: RawSample = serde_json::from_str(json)
        .map_err(|e| ProviderError::transient(format!("{model} returned invalid sample JSON: {e}")))?;

    let sample = GeneratedSample {
        id: format!("{}_{}", provider, Uuid::new_v4()),
        question: raw.question.trim().to_string(),
        answer: raw.answer.trim().to_string(),
        reasoning: text_field(&raw.reasoning),
        case_citation: text_field(&raw.case_citation),
        topic: context.topic.key(),
        difficulty: context.topic.difficulty.to_string(),
        jurisdiction: context.jurisdiction.clone(),
        sample_type: context.sample_type.id.to_string(),
        batch_id: context.batch_id.clone(),
        provider: provider.to_string(),
        model: model.to_string(),
        created_at: Utc::now(),
    };

    let missing: Vec<&str> = [
        ("question", &sample.question),
        ("answer", &sample.answer),
        ("reasoning", &sample.reasoning),
        ("case_citation", &sample.case_citation),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(name, _)| name)
    .collect();

    if !missing.is_empty() {
        return Err(ProviderError::transient(format!(
            "{model} sample is missing fields: {}",
            missing.join(", ")
        )));
    }

    Ok(sample)
}
