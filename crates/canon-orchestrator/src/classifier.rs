use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Routing verdict for one message.
pub enum QueryType {
    Conversational,
    Document,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Classification {
    pub query_type: QueryType,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

/// Rule-based router between plain conversation and document retrieval.
///
/// Scores start from a conversational baseline; pattern and keyword hits
/// push the document score up, negation phrases pull it down, and the
/// normalized document share must clear 0.6 to win.
pub struct QueryClassifier {
    conversational_patterns: Vec<(Regex, f64)>,
    document_patterns: Vec<(Regex, f64)>,
    document_keywords: Vec<(&'static str, f64)>,
    negation_phrases: Vec<&'static str>,
}

const CONVERSATIONAL_PATTERNS: &[(&str, f64)] = &[
    (r"^(hi|hello|hey|good morning|good afternoon)", 1.0),
    (r"^(thanks|thank you|bye|goodbye)", 1.0),
    (r"^how are you", 1.0),
    (r"\d+\s*[+\-*/]\s*\d+", 0.9),
    (r"^(calculate|compute|solve)", 0.7),
    (r"^what is (the )?(weather|time|date)", 1.0),
    (r"^define \w+", 0.8),
    (r"^explain \w+ in simple terms", 0.7),
    (r"^translate .+ to \w+", 1.0),
    (r"^convert \d+ .+ to \w+", 0.9),
    (r"^(write|create|generate) .+ (code|function|script)", 0.7),
    (r"^(write|compose|create) .+ (poem|story|song|email)", 1.0),
    (r"^suggest .+ (names|ideas|topics)", 0.9),
];

const DOCUMENT_PATTERNS: &[(&str, f64)] = &[
    (
        r"(policy|policies|procedure|handbook|manual|guide|document|report)",
        0.9,
    ),
    (r"(form|template|checklist|protocol)", 0.8),
    (r"(our company|our organization)", 0.9),
    (r"(employee|staff|human resources)", 0.8),
    (r"(vacation|leave|time off|benefits)", 0.85),
    (r"(expense|reimbursement|travel policy)", 0.9),
    (r"(find|search|look up|locate|show me|where is)", 0.7),
    (r"according to (the|our)", 0.9),
    (r"(in|from) (the|our) .+ (document|policy|report)", 0.95),
    (r"(quarterly|annual|monthly) report", 0.95),
    (r"(training|onboarding) (material|document)", 0.9),
    (r"(contract|agreement|terms)", 0.85),
    (r"how (do i|to) .+ (submit|request|apply|file)", 0.8),
    (r"(process|procedure|steps) (for|to)", 0.8),
    (r"(requirements|criteria|eligibility)", 0.75),
];

const DOCUMENT_KEYWORDS: &[(&str, f64)] = &[
    ("policy", 0.95),
    ("procedure", 0.9),
    ("handbook", 0.95),
    ("manual", 0.9),
    ("documentation", 0.95),
    ("report", 0.85),
    ("form", 0.8),
    ("template", 0.8),
    ("guideline", 0.85),
    ("protocol", 0.85),
    ("company", 0.7),
    ("employee", 0.65),
    ("internal", 0.75),
    ("workflow", 0.7),
    ("compliance", 0.75),
    ("find", 0.5),
    ("where", 0.4),
];

const NEGATION_PHRASES: &[&str] = &[
    "in general",
    "generally speaking",
    "typically",
    "usually",
    "in theory",
    "hypothetically",
    "what do you think",
    "your opinion",
];

impl QueryClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            conversational_patterns: compile(CONVERSATIONAL_PATTERNS)?,
            document_patterns: compile(DOCUMENT_PATTERNS)?,
            document_keywords: DOCUMENT_KEYWORDS.to_vec(),
            negation_phrases: NEGATION_PHRASES.to_vec(),
        })
    }

    pub fn classify(&self, message: &str) -> Classification {
        let query = message.trim().to_lowercase();
        let mut conversational = 0.5;
        let mut document: f64 = 0.0;
        let mut matched_keywords = Vec::new();

        for phrase in &self.negation_phrases {
            if query.contains(phrase) {
                conversational += 0.2;
                document -= 0.2;
            }
        }
        for (pattern, weight) in &self.conversational_patterns {
            if pattern.is_match(&query) {
                conversational += weight;
            }
        }
        for (pattern, weight) in &self.document_patterns {
            if pattern.is_match(&query) {
                document += weight;
            }
        }
        for word in query.split_whitespace() {
            if let Some((keyword, weight)) = self
                .document_keywords
                .iter()
                .find(|(keyword, _)| *keyword == word)
            {
                document += weight;
                matched_keywords.push((*keyword).to_string());
            }
        }

        let document = document.max(0.0);
        let total = conversational + document;
        let document_share = if total > 0.0 { document / total } else { 0.0 };

        if document_share > 0.6 {
            Classification {
                query_type: QueryType::Document,
                confidence: document_share,
                matched_keywords,
            }
        } else {
            Classification {
                query_type: QueryType::Conversational,
                confidence: 1.0 - document_share,
                matched_keywords,
            }
        }
    }
}

fn compile(patterns: &[(&str, f64)]) -> Result<Vec<(Regex, f64)>> {
    patterns
        .iter()
        .map(|(pattern, weight)| {
            let compiled = Regex::new(pattern)
                .with_context(|| format!("invalid classifier pattern {pattern:?}"))?;
            Ok((compiled, *weight))
        })
        .collect()
}
