//! Models describing what the generator can produce.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::{SampleType, Topic};
use crate::config::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderModels {
    pub name: String,
    #[schema(value_type = String, example = "openai_compatible")]
    pub kind: ProviderKind,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelsResponse {
    pub providers: Vec<ProviderModels>,
    /// Order the worker falls back through; the first entry is the default starting model
    pub fallback_order: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopicResponse {
    pub practice_area: String,
    pub topic: String,
    pub difficulty: String,
}

impl From<&Topic> for TopicResponse {
    fn from(topic: &Topic) -> Self {
        Self {
            practice_area: topic.practice_area.to_string(),
            topic: topic.topic.to_string(),
            difficulty: topic.difficulty.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SampleTypeResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub focus: String,
}

impl From<&SampleType> for SampleTypeResponse {
    fn from(sample_type: &SampleType) -> Self {
        Self {
            id: sample_type.id.to_string(),
            name: sample_type.name.to_string(),
            description: sample_type.description.to_string(),
            focus: sample_type.focus.to_string(),
        }
    }
}
