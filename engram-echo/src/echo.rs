//! Multi-modal echo encoding

use engram_core::{EchoConfig, EchoDepth, EchoMetadata};
use engram_llm::LlmProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const ECHO_PROMPT: &str = "You encode a memory for later retrieval.\n\
Memory content:\n{content}\n\n\
Respond with a single JSON object with these fields:\n\
- paraphrases: 3-5 diverse rephrasings of the memory\n\
- keywords: core concepts and entities\n\
- implications: logical consequences or if-then deductions\n\
- questions: questions this memory answers\n\
- question_form: a single question-form version of the memory\n\
- category: the semantic bucket (fact, preference, goal, habit, identity, \
relationship, work, health, finance)\n\
- importance: significance of the information, 0.0-1.0\n\
{depth_instructions}\n\
Return ONLY the JSON object.";

static IMPORTANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(important|remember|don't forget|always|never|must|critical)\b")
        .expect("valid pattern")
});
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").expect("valid pattern"));
static DATE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\d{1,2}/\d{1,2}(/\d{2,4})?").expect("valid pattern"),
        Regex::new(r"\d{1,2}-\d{1,2}(-\d{2,4})?").expect("valid pattern"),
        Regex::new(
            r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\b",
        )
        .expect("valid pattern"),
    ]
});
static PREFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(prefer|like|love|hate|favorite|always use|never use)\b")
        .expect("valid pattern")
});
static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|api[_\s]?key|token|secret|credential|auth)\b")
        .expect("valid pattern")
});
static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("valid pattern")
});
static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid pattern"));

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "shall", "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with",
        "at", "by", "from", "as", "into", "through", "during", "before", "after", "above",
        "below", "between", "under", "again", "further", "then", "once", "here", "there",
        "when", "where", "why", "how", "all", "each", "few", "more", "most", "other", "some",
        "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just",
        "and", "but", "if", "or", "because", "until", "while", "this", "that", "these",
        "those", "i", "me", "my", "myself", "we", "our", "you", "your", "he", "him", "his",
        "she", "her", "it", "its", "they", "them", "their", "what", "which", "who", "whom",
    ]
    .into_iter()
    .collect()
});

/// External context hints used by depth assessment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoContext {
    /// How many times the content was mentioned in the conversation.
    pub mention_count: u32,
    /// The user explicitly marked the content important.
    pub user_marked_important: bool,
}

/// Result of echo processing.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoResult {
    pub raw: String,
    pub paraphrases: Vec<String>,
    pub keywords: Vec<String>,
    pub implications: Vec<String>,
    pub questions: Vec<String>,
    pub question_form: Option<String>,
    pub category: Option<String>,
    pub importance: f64,
    pub depth: EchoDepth,
    pub strength_multiplier: f64,
}

impl EchoResult {
    /// Persisted projection attached to the memory row.
    pub fn to_metadata(&self) -> EchoMetadata {
        EchoMetadata {
            depth: self.depth,
            paraphrases: self.paraphrases.clone(),
            keywords: self.keywords.clone(),
            implications: self.implications.clone(),
            questions: self.questions.clone(),
            question_form: self.question_form.clone(),
            category: self.category.clone(),
            importance: self.importance,
        }
    }
}

/// Processes memories through multi-modal echo encoding.
pub struct EchoProcessor {
    llm: Option<Arc<dyn LlmProvider>>,
    config: EchoConfig,
}

impl EchoProcessor {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, config: EchoConfig) -> Self {
        Self { llm, config }
    }

    /// Process content through echo encoding. Never fails: LLM or parse
    /// trouble degrades one depth at a time down to shallow.
    pub fn process(
        &self,
        content: &str,
        depth: Option<EchoDepth>,
        context: Option<EchoContext>,
    ) -> EchoResult {
        let depth = match depth {
            Some(depth) => depth,
            None if self.config.auto_depth => self.assess_depth(content, context),
            None => self.config.default_depth,
        };
        match depth {
            EchoDepth::Shallow => self.shallow_echo(content),
            EchoDepth::Medium => self.medium_echo(content),
            EchoDepth::Deep => self.deep_echo(content),
        }
    }

    /// Re-echo a memory one depth deeper on frequent access.
    pub fn reecho(&self, content: &str, current_depth: EchoDepth) -> EchoResult {
        self.process(content, Some(current_depth.deeper()), None)
    }

    /// Auto-detect echo depth from content signals.
    ///
    /// ≥3 signals → deep, ≥1 → medium, else shallow.
    fn assess_depth(&self, content: &str, context: Option<EchoContext>) -> EchoDepth {
        let mut signals = 0u32;

        if IMPORTANCE_RE.is_match(content) {
            signals += 2;
        }
        if NUMBER_RE.is_match(content) {
            signals += 1;
        }
        if DATE_RES.iter().any(|re| re.is_match(content)) {
            signals += 1;
        }
        // Proper nouns: capitalized words past the sentence start.
        let has_proper_noun = content
            .split_whitespace()
            .skip(1)
            .any(|w| w.chars().next().map(char::is_uppercase).unwrap_or(false));
        if has_proper_noun {
            signals += 1;
        }
        if PREFERENCE_RE.is_match(content) {
            signals += 1;
        }
        if SECRET_RE.is_match(content) {
            signals += 2;
        }
        if let Some(context) = context {
            if context.mention_count > 1 {
                signals += 1;
            }
            if context.user_marked_important {
                signals += 2;
            }
        }

        if signals >= 3 {
            EchoDepth::Deep
        } else if signals >= 1 {
            EchoDepth::Medium
        } else {
            EchoDepth::Shallow
        }
    }

    /// Shallow echo: keyword extraction only, no LLM call.
    fn shallow_echo(&self, content: &str) -> EchoResult {
        EchoResult {
            raw: content.to_string(),
            paraphrases: Vec::new(),
            keywords: extract_keywords_simple(content),
            implications: Vec::new(),
            questions: Vec::new(),
            question_form: None,
            category: None,
            importance: 0.3,
            depth: EchoDepth::Shallow,
            strength_multiplier: EchoDepth::Shallow.strength_multiplier(),
        }
    }

    /// Medium echo: paraphrases + keywords + category.
    fn medium_echo(&self, content: &str) -> EchoResult {
        match self.llm_echo(
            content,
            "Generate: paraphrases, keywords, category. Skip: implications, questions.",
        ) {
            Some(parsed) => EchoResult {
                raw: content.to_string(),
                question_form: parsed
                    .question_form
                    .clone()
                    .or_else(|| parsed.questions.first().cloned()),
                paraphrases: parsed.paraphrases,
                keywords: parsed.keywords,
                implications: Vec::new(),
                questions: Vec::new(),
                category: parsed.category,
                importance: parsed.importance,
                depth: EchoDepth::Medium,
                strength_multiplier: EchoDepth::Medium.strength_multiplier(),
            },
            None => {
                warn!("medium echo failed, falling back to shallow");
                self.shallow_echo(content)
            }
        }
    }

    /// Deep echo: full multi-modal processing.
    fn deep_echo(&self, content: &str) -> EchoResult {
        match self.llm_echo(
            content,
            "Generate ALL fields: paraphrases, keywords, implications, questions, category.",
        ) {
            Some(parsed) => EchoResult {
                raw: content.to_string(),
                question_form: parsed
                    .question_form
                    .clone()
                    .or_else(|| parsed.questions.first().cloned()),
                paraphrases: parsed.paraphrases,
                keywords: parsed.keywords,
                implications: parsed.implications,
                questions: parsed.questions,
                category: parsed.category,
                importance: parsed.importance,
                depth: EchoDepth::Deep,
                strength_multiplier: EchoDepth::Deep.strength_multiplier(),
            },
            None => {
                warn!("deep echo failed, falling back to medium");
                self.medium_echo(content)
            }
        }
    }

    fn llm_echo(&self, content: &str, depth_instructions: &str) -> Option<EchoOutput> {
        let llm = self.llm.as_ref()?;
        let prompt = ECHO_PROMPT
            .replace("{content}", content)
            .replace("{depth_instructions}", depth_instructions);
        let response = match llm.generate(&prompt) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "echo LLM call failed");
                return None;
            }
        };
        let parsed = parse_echo_response(&response)?;
        if parsed.paraphrases.is_empty() || parsed.keywords.is_empty() {
            return None;
        }
        Some(parsed)
    }
}

/// Parsed LLM output for echo processing.
struct EchoOutput {
    paraphrases: Vec<String>,
    keywords: Vec<String>,
    implications: Vec<String>,
    questions: Vec<String>,
    question_form: Option<String>,
    category: Option<String>,
    importance: f64,
}

/// Tolerant parse of the echo response: fenced blocks and trailing commas are
/// repaired, single-item aliases are flattened, scalars coerce to lists.
fn parse_echo_response(response: &str) -> Option<EchoOutput> {
    let blob = extract_json_blob(response)?;
    let value = serde_json::from_str::<serde_json::Value>(&blob)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(&blob)).ok())?;
    let object = value.as_object()?;

    let list = |primary: &str, alias: &str| -> Vec<String> {
        let raw = object.get(primary).or_else(|| object.get(alias));
        coerce_string_list(raw)
    };

    let question_form = object
        .get("question_form")
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => items
                .first()
                .and_then(|item| item.as_str().map(str::to_string)),
            _ => None,
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let category = object
        .get("category")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let importance = match object.get("importance") {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.5),
        _ => 0.5,
    };

    Some(EchoOutput {
        paraphrases: list("paraphrases", "paraphrase"),
        keywords: list("keywords", "keyword"),
        implications: list("implications", "implication"),
        questions: list("questions", "question"),
        question_form,
        category,
        importance: importance.clamp(0.0, 1.0),
    })
}

fn extract_json_blob(response: &str) -> Option<String> {
    let text = response.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(captures) = FENCE_RE.captures(text) {
        return Some(captures.get(1)?.as_str().trim().to_string());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        return Some(text[start..=end].trim().to_string());
    }
    None
}

fn repair_json(text: &str) -> String {
    TRAILING_COMMA_RE.replace_all(text, "$1").into_owned()
}

fn coerce_string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    let cleaned = |s: &str| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };
    match value {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => cleaned(s),
                other => cleaned(&other.to_string()),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => cleaned(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Keyword extraction without the LLM: stop-word filtered unique terms.
fn extract_keywords_simple(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in content
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| t.len() > 2)
    {
        let lower = token.to_ascii_lowercase();
        if STOP_WORDS.contains(lower.as_str()) || !seen.insert(lower.clone()) {
            continue;
        }
        keywords.push(lower);
        if keywords.len() == 10 {
            break;
        }
    }
    keywords
}
