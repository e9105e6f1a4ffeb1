//! Benchmark question definitions and loading

pub mod loader;

pub use loader::{
    append_jsonl, latest_file, load_corpus, load_corpus_tsv, read_jsonl, write_jsonl, LoadError,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages whose numeric conventions use a decimal comma.
const DECIMAL_COMMA_LANGUAGES: &[&str] = &[
    "de", "es", "fr", "it", "pt", "nl", "pl", "ru", "sv", "da", "fi", "cs", "tr",
];

/// Language tag (lowercase primary ISO-639 subtag, e.g. `en`, `de`, `es`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Wrap a tag that is already a lowercase primary subtag
    pub(crate) fn from_code(code: &str) -> Self {
        Language(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether numbers in this language are conventionally written `3,5`
    pub fn uses_decimal_comma(&self) -> bool {
        DECIMAL_COMMA_LANGUAGES.contains(&self.0.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    /// Accepts `en`, `EN`, `en-GB`, `en_uk`; region subtags are dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primary = s
            .trim()
            .split(|c| c == '-' || c == '_')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let valid_len = (2..=3).contains(&primary.len());
        if !valid_len || !primary.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(format!("Invalid language tag: {:?}", s));
        }
        Ok(Language(primary))
    }
}

impl TryFrom<String> for Language {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_language() -> Language {
    Language::from_code("en")
}

/// Question category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionCategory {
    #[serde(
        rename = "factual-recall",
        alias = "factual_recall",
        alias = "Factual Accuracy",
        alias = "factual-accuracy"
    )]
    FactualRecall,
    #[serde(
        rename = "procedural-reasoning",
        alias = "procedural_reasoning",
        alias = "Procedural Reasoning"
    )]
    ProceduralReasoning,
}

impl QuestionCategory {
    pub fn all() -> Vec<QuestionCategory> {
        vec![QuestionCategory::FactualRecall, QuestionCategory::ProceduralReasoning]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::FactualRecall => "factual-recall",
            QuestionCategory::ProceduralReasoning => "procedural-reasoning",
        }
    }

    /// Whether reasoning text is judged against a gold rationale
    pub fn judges_reasoning(&self) -> bool {
        matches!(self, QuestionCategory::ProceduralReasoning)
    }
}

impl FromStr for QuestionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['_', ' '], "-");
        match key.as_str() {
            "factual-recall" | "factual-accuracy" | "factual" => Ok(QuestionCategory::FactualRecall),
            "procedural-reasoning" | "procedural" | "reasoning" => {
                Ok(QuestionCategory::ProceduralReasoning)
            }
            _ => Err(format!("Unknown question category: {}", s)),
        }
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A benchmark question in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question_id")]
    pub id: String,
    #[serde(alias = "domain")]
    pub category: QuestionCategory,
    #[serde(alias = "question_text", alias = "question_text_english")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(alias = "canonical_answer", alias = "correct_answer")]
    pub answer: String,
    #[serde(default, alias = "gold_standard_reasoning", skip_serializing_if = "Option::is_none")]
    pub gold_reasoning: Option<String>,
    /// Extra accepted answer forms, matched against the extracted token
    #[serde(default, alias = "answer_format_regex", skip_serializing_if = "Option::is_none")]
    pub answer_pattern: Option<String>,
    #[serde(default = "default_language")]
    pub language: Language,
}

impl Question {
    pub fn new(
        id: impl Into<String>,
        category: QuestionCategory,
        text: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            text: text.into(),
            choices: Vec::new(),
            answer: answer.into(),
            gold_reasoning: None,
            answer_pattern: None,
            language: default_language(),
        }
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gold_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.gold_reasoning = Some(reasoning.into());
        self
    }

    pub fn with_answer_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.answer_pattern = Some(pattern.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Option letters for a multiple-choice question.
    ///
    /// A choice written as `B) Berlin` or `B. Berlin` keeps its own letter;
    /// unlabelled choices are lettered by position.
    pub fn choice_labels(&self) -> Vec<char> {
        self.choices
            .iter()
            .enumerate()
            .map(|(idx, choice)| own_label(choice).unwrap_or((b'A' + (idx as u8 % 26)) as char))
            .collect()
    }

    /// The prompt sent to a model: question text followed by any choices
    pub fn prompt(&self) -> String {
        if self.choices.is_empty() {
            return self.text.clone();
        }
        let labels = self.choice_labels();
        let mut prompt = self.text.clone();
        for (label, choice) in labels.iter().zip(&self.choices) {
            let trimmed = choice.trim();
            prompt.push('\n');
            if own_label(trimmed).is_some() {
                prompt.push_str(trimmed);
            } else {
                prompt.push_str(&format!("{}) {}", label, trimmed));
            }
        }
        prompt
    }

    /// Render this question in another language, keeping answers and rationale
    pub fn localized(&self, language: Language, text: impl Into<String>) -> Question {
        Question {
            text: text.into(),
            language,
            ..self.clone()
        }
    }
}

/// Letter of a choice written as `B) Berlin`, `B. Berlin` or `B: Berlin`
fn own_label(choice: &str) -> Option<char> {
    let mut chars = choice.trim_start().chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(')' | '.' | ':')) if letter.is_ascii_alphabetic() => {
            Some(letter.to_ascii_uppercase())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language() {
        assert_eq!("EN".parse::<Language>().unwrap().as_str(), "en");
        assert_eq!("en_uk".parse::<Language>().unwrap().as_str(), "en");
        assert_eq!("de-DE".parse::<Language>().unwrap().as_str(), "de");
        assert!("".parse::<Language>().is_err());
        assert!("english".parse::<Language>().is_err());
    }

    #[test]
    fn test_decimal_comma_languages() {
        assert!("de".parse::<Language>().unwrap().uses_decimal_comma());
        assert!("es".parse::<Language>().unwrap().uses_decimal_comma());
        assert!(!"en".parse::<Language>().unwrap().uses_decimal_comma());
    }

    #[test]
    fn test_parse_category() {
        assert_eq!(
            "Factual Accuracy".parse::<QuestionCategory>().unwrap(),
            QuestionCategory::FactualRecall
        );
        assert_eq!(
            "procedural_reasoning".parse::<QuestionCategory>().unwrap(),
            QuestionCategory::ProceduralReasoning
        );
        assert!("trivia".parse::<QuestionCategory>().is_err());
    }

    #[test]
    fn test_deserialize_original_field_names() {
        let line = r#"{"question_id":"PR-007","domain":"Procedural Reasoning","question_text_english":"Split 84 apples into 2 groups.","answer":"42","gold_standard_reasoning":"divide total by groups","language":"EN"}"#;
        let q: Question = serde_json::from_str(line).unwrap();
        assert_eq!(q.id, "PR-007");
        assert_eq!(q.category, QuestionCategory::ProceduralReasoning);
        assert_eq!(q.gold_reasoning.as_deref(), Some("divide total by groups"));
        assert_eq!(q.language.as_str(), "en");
    }

    #[test]
    fn test_choice_labels_and_prompt() {
        let q = Question::new("FA-001", QuestionCategory::FactualRecall, "Capital of Germany?", "B")
            .with_choices(["Paris", "Berlin", "C) Madrid"]);
        assert_eq!(q.choice_labels(), vec!['A', 'B', 'C']);
        assert_eq!(q.prompt(), "Capital of Germany?\nA) Paris\nB) Berlin\nC) Madrid");
    }

    #[test]
    fn test_localized_keeps_answer() {
        let q = Question::new("FA-002", QuestionCategory::FactualRecall, "How many legs has a spider?", "8");
        let de = q.localized("de".parse().unwrap(), "Wie viele Beine hat eine Spinne?");
        assert_eq!(de.answer, "8");
        assert_eq!(de.language.as_str(), "de");
        assert_eq!(de.id, q.id);
    }
}
