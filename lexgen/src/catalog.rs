//! Built-in generation catalogue: legal topics and sample types, plus the rotations the worker
//! walks through while generating.

use serde::Serialize;

/// A practice-area topic at a fixed difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub practice_area: &'static str,
    pub topic: &'static str,
    pub difficulty: &'static str,
}

impl Topic {
    const fn new(practice_area: &'static str, topic: &'static str, difficulty: &'static str) -> Self {
        Self {
            practice_area,
            topic,
            difficulty,
        }
    }

    /// `"{practice_area} - {topic}"`, shown as the batch's current sample.
    pub fn key(&self) -> String {
        format!("{} - {}", self.practice_area, self.topic)
    }
}

pub const TOPICS: &[Topic] = &[
    Topic::new("Contract Law", "Formation of Contracts", "intermediate"),
    Topic::new("Contract Law", "Breach of Contract", "intermediate"),
    Topic::new("Contract Law", "Remedies for Breach", "advanced"),
    Topic::new("Contract Law", "Terms and Conditions", "basic"),
    Topic::new("Contract Law", "Misrepresentation", "advanced"),
    Topic::new("Tort Law", "Professional Negligence", "advanced"),
    Topic::new("Tort Law", "Occupiers Liability", "intermediate"),
    Topic::new("Tort Law", "Vicarious Liability", "intermediate"),
    Topic::new("Tort Law", "Defamation", "advanced"),
    Topic::new("Tort Law", "Nuisance", "intermediate"),
    Topic::new("Company Law", "Directors Duties", "advanced"),
    Topic::new("Company Law", "Shareholder Rights", "intermediate"),
    Topic::new("Company Law", "Corporate Governance", "advanced"),
    Topic::new("Company Law", "Insolvency", "expert"),
    Topic::new("Company Law", "Company Formation", "basic"),
    Topic::new("Employment Law", "Discrimination", "intermediate"),
    Topic::new("Employment Law", "Wrongful Dismissal", "advanced"),
    Topic::new("Employment Law", "Employment Contracts", "basic"),
    Topic::new("Employment Law", "TUPE", "advanced"),
    Topic::new("Employment Law", "Redundancy", "intermediate"),
    Topic::new("Property Law", "Leasehold vs Freehold", "basic"),
    Topic::new("Property Law", "Land Registration", "intermediate"),
    Topic::new("Property Law", "Easements and Covenants", "advanced"),
    Topic::new("Property Law", "Mortgages", "intermediate"),
    Topic::new("Criminal Law", "Actus Reus and Mens Rea", "basic"),
    Topic::new("Criminal Law", "Murder and Manslaughter", "intermediate"),
    Topic::new("Criminal Law", "Criminal Defenses", "advanced"),
    Topic::new("Criminal Law", "Fraud", "advanced"),
    Topic::new("Trusts Law", "Constructive Trusts", "advanced"),
    Topic::new("Trusts Law", "Charitable Trusts", "intermediate"),
    Topic::new("Trusts Law", "Breach of Trust", "advanced"),
    Topic::new("Family Law", "Divorce Proceedings", "intermediate"),
    Topic::new("Family Law", "Child Custody", "intermediate"),
    Topic::new("Family Law", "Financial Settlements", "advanced"),
    Topic::new("Tax Law", "Capital Gains Tax", "advanced"),
    Topic::new("Tax Law", "VAT", "intermediate"),
    Topic::new("Tax Law", "Income Tax", "intermediate"),
    Topic::new("Administrative Law", "Judicial Review", "advanced"),
    Topic::new("Administrative Law", "Public Law Remedies", "expert"),
    Topic::new("Legal Ethics", "Conflicts of Interest", "intermediate"),
    Topic::new("Legal Ethics", "Client Confidentiality", "basic"),
    Topic::new("Legal Ethics", "Money Laundering", "advanced"),
];

pub const DIFFICULTIES: &[&str] = &["basic", "intermediate", "advanced", "expert"];

/// A sample shape the prompt asks the model to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleType {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub focus: &'static str,
}

pub const SAMPLE_TYPES: &[SampleType] = &[
    SampleType {
        id: "case_analysis",
        name: "Case Analysis",
        description: "Analyze legal problems using case law and statutes",
        focus: "Problem-solving with legal reasoning",
    },
    SampleType {
        id: "educational",
        name: "Educational/Law Teaching",
        description: "Explain legal principles, rules, and doctrines",
        focus: "Teaching foundational legal concepts",
    },
    SampleType {
        id: "client_interaction",
        name: "Client Interaction",
        description: "Practical client communication and advice",
        focus: "Real-world lawyer-client scenarios",
    },
    SampleType {
        id: "statutory_interpretation",
        name: "Statutory Interpretation",
        description: "Explain and apply statutory provisions",
        focus: "Understanding legislation",
    },
    SampleType {
        id: "legal_dialogue",
        name: "Legal Dialogue",
        description: "Multi-turn conversations and dialectical reasoning",
        focus: "Conversational AI with legal context and general reasoning",
    },
    SampleType {
        id: "pure_conceptual",
        name: "Pure Conceptual Knowledge",
        description: "Factual legal knowledge without reasoning (like textbooks)",
        focus: "Knowledge retention and retrieval",
    },
    SampleType {
        id: "comparative_analysis",
        name: "Comparative Legal Analysis",
        description: "Compare legal approaches, jurisdictions, or doctrines",
        focus: "Critical thinking and analytical reasoning",
    },
    SampleType {
        id: "ethical_reasoning",
        name: "Legal Ethics & Professional Conduct",
        description: "Ethical dilemmas and professional responsibility",
        focus: "Moral reasoning within legal frameworks",
    },
    SampleType {
        id: "procedural_guide",
        name: "Procedural Step-by-Step Guide",
        description: "Sequential procedural instructions",
        focus: "Practical procedural knowledge",
    },
    SampleType {
        id: "legal_news_analysis",
        name: "Legal News & Recent Developments",
        description: "Analysis of recent legal developments, court rulings, and regulatory changes",
        focus: "Current legal affairs and their implications",
    },
    SampleType {
        id: "case_study",
        name: "In-Depth Case Study",
        description: "Comprehensive analysis of landmark cases with broader legal implications",
        focus: "Deep case analysis for legal learning",
    },
    SampleType {
        id: "practical_application",
        name: "Practical Legal Application",
        description: "Real-world application in specific domains (immigration, criminal, family, etc.)",
        focus: "Domain-specific practical legal scenarios",
    },
    SampleType {
        id: "simple_qa",
        name: "Simple Q&A",
        description: "Direct question and answer without complex structure",
        focus: "Quick factual answers and simple explanations",
    },
    SampleType {
        id: "general_reasoning",
        name: "General Legal Reasoning",
        description: "General reasoning about legal principles without rigid structure",
        focus: "Flexible reasoning and explanation",
    },
    SampleType {
        id: "hypothetical",
        name: "Legal Hypothetical",
        description: "Brief hypothetical scenarios with concise analysis",
        focus: "Quick scenario-based thinking",
    },
    SampleType {
        id: "conversational",
        name: "Professional Legal Conversation",
        description: "Natural lawyer-style conversation with professional tone",
        focus: "Talk like a lawyer in everyday conversation",
    },
];

pub fn find_sample_type(id: &str) -> Option<&'static SampleType> {
    SAMPLE_TYPES.iter().find(|t| t.id == id)
}

/// Cycles through the topics matching the batch filters.
#[derive(Debug, Clone)]
pub struct TopicRotation {
    topics: Vec<Topic>,
    position: usize,
}

impl TopicRotation {
    /// Returns `None` when no topic matches the filters.
    ///
    /// The topic filter matches a topic name or a practice area, ignoring case.
    pub fn new(topic_filter: Option<&str>, difficulty_filter: Option<&str>) -> Option<Self> {
        let topics: Vec<Topic> = TOPICS
            .iter()
            .filter(|t| {
                topic_filter
                    .is_none_or(|f| t.topic.eq_ignore_ascii_case(f) || t.practice_area.eq_ignore_ascii_case(f))
            })
            .filter(|t| difficulty_filter.is_none_or(|d| t.difficulty.eq_ignore_ascii_case(d)))
            .copied()
            .collect();

        if topics.is_empty() {
            return None;
        }
        Some(Self { topics, position: 0 })
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Iterator for TopicRotation {
    type Item = Topic;

    fn next(&mut self) -> Option<Topic> {
        let topic = self.topics.get(self.position % self.topics.len()).copied();
        self.position += 1;
        topic
    }
}

/// Either a pinned sample type or the full cycle.
#[derive(Debug, Clone)]
pub struct SampleTypeRotation {
    pinned: Option<&'static SampleType>,
    position: usize,
}

impl SampleTypeRotation {
    /// `None` or `"balance"` cycles through every type; an unknown id is an error.
    pub fn new(sample_type: Option<&str>) -> Result<Self, String> {
        let pinned = match sample_type {
            None | Some("balance") => None,
            Some(id) => Some(find_sample_type(id).ok_or_else(|| format!("unknown sample type '{id}'"))?),
        };
        Ok(Self { pinned, position: 0 })
    }
}

impl Iterator for SampleTypeRotation {
    type Item = &'static SampleType;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(pinned) = self.pinned {
            return Some(pinned);
        }
        let sample_type = SAMPLE_TYPES.get(self.position % SAMPLE_TYPES.len());
        self.position += 1;
        sample_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_filter_matches_practice_area_or_topic() {
        let by_area = TopicRotation::new(Some("tort law"), None).unwrap();
        assert_eq!(by_area.len(), 5);

        let mut by_topic = TopicRotation::new(Some("VAT"), None).unwrap();
        assert_eq!(by_topic.next().map(|t| t.practice_area), Some("Tax Law"));
        assert_eq!(by_topic.next().map(|t| t.topic), Some("VAT"));
    }

    #[test]
    fn rotation_wraps_and_respects_difficulty() {
        let rotation = TopicRotation::new(None, Some("expert")).unwrap();
        let names: Vec<_> = rotation.take(3).map(|t| t.topic).collect();
        assert_eq!(names, vec!["Insolvency", "Public Law Remedies", "Insolvency"]);
    }

    #[test]
    fn empty_filter_result_is_none() {
        assert!(TopicRotation::new(Some("Maritime Law"), None).is_none());
        assert!(TopicRotation::new(Some("Tax Law"), Some("basic")).is_none());
    }

    #[test]
    fn sample_types_cycle_unless_pinned() {
        let cycled: Vec<_> = SampleTypeRotation::new(None).unwrap().take(2).map(|t| t.id).collect();
        assert_eq!(cycled, vec!["case_analysis", "educational"]);

        let pinned: Vec<_> = SampleTypeRotation::new(Some("simple_qa")).unwrap().take(2).map(|t| t.id).collect();
        assert_eq!(pinned, vec!["simple_qa", "simple_qa"]);

        assert!(SampleTypeRotation::new(Some("limerick")).is_err());
    }
}
