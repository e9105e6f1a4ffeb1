//! Final-answer extraction from free-form model output
//!
//! Rules are tried in order and the first one that yields a token of the
//! expected shape wins. Finding nothing is an outcome, not an error.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::corpus::{Language, Question};

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?(?:</think>|\z)").expect("valid regex"));

static BOXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\boxed\{([^{}]*)\}").expect("valid regex"));

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+\x{2212}]?(?:\d{1,3}(?:[ \x{00A0}\x{202F}]\d{3})+|\d+)(?:[.,]\d+)*")
        .expect("valid regex")
});

static LABELLED_CHOICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([A-Z])\)|\*\*([A-Z])\*\*|\b([A-Z])\)").expect("valid regex")
});

/// Lead-in words sometimes written before an option letter
const CHOICE_LEAD_INS: &[&str] = &["option", "choice", "opción", "opcion", "antwort", "auswahl"];

/// Default final-answer markers (English, German, Spanish)
pub fn default_markers() -> Vec<String> {
    [
        "final answer",
        "the answer is",
        "answer:",
        "respuesta final",
        "la respuesta es",
        "respuesta:",
        "endgültige antwort",
        "die antwort ist",
        "antwort:",
        "lösung:",
        "solución:",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

/// Numeric notation of a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberStyle {
    /// `1,234.5`
    DecimalPoint,
    /// `1.234,5`
    DecimalComma,
}

impl NumberStyle {
    pub fn for_language(language: &Language) -> Self {
        if language.uses_decimal_comma() {
            NumberStyle::DecimalComma
        } else {
            NumberStyle::DecimalPoint
        }
    }

    /// `(decimal, thousands)` separators
    fn separators(self) -> (char, char) {
        match self {
            NumberStyle::DecimalPoint => ('.', ','),
            NumberStyle::DecimalComma => (',', '.'),
        }
    }
}

/// Expected shape of a question's final answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFormat {
    /// Option letters, with each option's text reduced to plain words
    Choice {
        options: Vec<char>,
        bodies: Vec<String>,
    },
    Numeric {
        style: NumberStyle,
    },
    /// Free text; `expected` and `pattern` let a bare mention in the
    /// response count as the answer
    Text {
        expected: Option<String>,
        pattern: Option<String>,
    },
}

impl AnswerFormat {
    /// Choice when the question has options, numeric when the canonical
    /// answer is a number, free text otherwise
    pub fn for_question(question: &Question) -> Self {
        if !question.choices.is_empty() {
            return AnswerFormat::Choice {
                options: question.choice_labels(),
                bodies: question
                    .choices
                    .iter()
                    .map(|c| plain_words(choice_body(c)))
                    .collect(),
            };
        }
        if parse_number(&question.answer, NumberStyle::DecimalPoint).is_some() {
            return AnswerFormat::Numeric {
                style: NumberStyle::for_language(&question.language),
            };
        }
        AnswerFormat::Text {
            expected: normalize_text(&question.answer),
            pattern: question
                .answer_pattern
                .clone()
                .filter(|p| !p.trim().is_empty()),
        }
    }

    /// Free text with nothing to look for beyond explicit declarations
    pub fn text() -> Self {
        AnswerFormat::Text {
            expected: None,
            pattern: None,
        }
    }
}

/// The answer token found in a response, already normalised
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ExtractedAnswer {
    Answer(String),
    None,
}

impl ExtractedAnswer {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtractedAnswer::Answer(a) => Some(a),
            ExtractedAnswer::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExtractedAnswer::None)
    }
}

impl From<Option<String>> for ExtractedAnswer {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(a) => ExtractedAnswer::Answer(a),
            None => ExtractedAnswer::None,
        }
    }
}

impl From<ExtractedAnswer> for Option<String> {
    fn from(value: ExtractedAnswer) -> Self {
        match value {
            ExtractedAnswer::Answer(a) => Some(a),
            ExtractedAnswer::None => None,
        }
    }
}

impl fmt::Display for ExtractedAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractedAnswer::Answer(a) => f.write_str(a),
            ExtractedAnswer::None => f.write_str("<none>"),
        }
    }
}

/// Extraction rules in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionRule {
    FinalAnswerMarker,
    BoxedAnswer,
    LastLineToken,
    FirstOccurrence,
}

impl ExtractionRule {
    pub fn all() -> [ExtractionRule; 4] {
        [
            ExtractionRule::FinalAnswerMarker,
            ExtractionRule::BoxedAnswer,
            ExtractionRule::LastLineToken,
            ExtractionRule::FirstOccurrence,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionRule::FinalAnswerMarker => "final-answer-marker",
            ExtractionRule::BoxedAnswer => "boxed-answer",
            ExtractionRule::LastLineToken => "last-line-token",
            ExtractionRule::FirstOccurrence => "first-occurrence",
        }
    }
}

impl fmt::Display for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule-based answer extractor
#[derive(Debug, Clone)]
pub struct AnswerExtractor {
    markers: Option<Regex>,
}

impl Default for AnswerExtractor {
    fn default() -> Self {
        Self::new(&default_markers())
    }
}

impl AnswerExtractor {
    /// Markers are matched case-insensitively; the longest wins at a position
    pub fn new(markers: &[String]) -> Self {
        let mut sorted: Vec<&str> = markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .collect();
        sorted.sort_by_key(|m| std::cmp::Reverse(m.chars().count()));

        let markers = if sorted.is_empty() {
            None
        } else {
            let alternation = sorted
                .iter()
                .map(|m| regex::escape(m))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!("(?i)(?:{})", alternation)).ok()
        };

        Self { markers }
    }

    pub fn extract(&self, raw_response: &str, format: &AnswerFormat) -> ExtractedAnswer {
        self.extract_with_rule(raw_response, format).0
    }

    /// The extracted answer and the rule that produced it
    pub fn extract_with_rule(
        &self,
        raw_response: &str,
        format: &AnswerFormat,
    ) -> (ExtractedAnswer, Option<ExtractionRule>) {
        let text = visible_text(raw_response);

        for rule in ExtractionRule::all() {
            let found = match rule {
                ExtractionRule::FinalAnswerMarker => self.from_marker(&text, format),
                ExtractionRule::BoxedAnswer => from_boxed(&text, format),
                ExtractionRule::LastLineToken => from_last_line(&text, format),
                ExtractionRule::FirstOccurrence => from_first_occurrence(&text, format),
            };
            if let Some(token) = found {
                return (ExtractedAnswer::Answer(token), Some(rule));
            }
        }

        (ExtractedAnswer::None, None)
    }

    /// Whether `line` opens with a final-answer marker
    pub(crate) fn is_marker_line(&self, line: &str) -> bool {
        let Some(markers) = &self.markers else {
            return false;
        };
        let trimmed = line.trim_start_matches(is_decoration);
        markers.find(trimmed).is_some_and(|m| m.start() == 0)
    }

    fn from_marker(&self, text: &str, format: &AnswerFormat) -> Option<String> {
        let markers = self.markers.as_ref()?;
        let ends: Vec<usize> = markers.find_iter(text).map(|m| m.end()).collect();

        ends.into_iter().rev().find_map(|end| {
            let rest = &text[end..];
            let mut lines = rest.lines();
            let first = lines.next().unwrap_or_default();
            let segment = if strip_decorations(first).is_empty() {
                lines.find(|l| !strip_decorations(l).is_empty())?
            } else {
                first
            };
            parse_segment(segment, format)
        })
    }
}

/// Response text outside `<think>` blocks, or the whole text if nothing else
pub(crate) fn visible_text(raw: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(raw, "");
    if stripped.trim().is_empty() {
        raw.replace("<think>", "").replace("</think>", "")
    } else {
        stripped.into_owned()
    }
}

fn from_boxed(text: &str, format: &AnswerFormat) -> Option<String> {
    let content = BOXED.captures_iter(text).last()?.get(1)?.as_str();
    parse_segment(content, format)
}

fn from_last_line(text: &str, format: &AnswerFormat) -> Option<String> {
    let line = text.lines().rev().find(|l| !strip_decorations(l).is_empty())?;
    let cleaned = strip_decorations(line);

    match format {
        AnswerFormat::Choice { options, bodies } => parse_choice_line(cleaned, options)
            .or_else(|| choice_mentioned(cleaned, options, bodies)),
        AnswerFormat::Numeric { style } => parse_number(cleaned, *style),
        AnswerFormat::Text { .. } => {
            if cleaned.split_whitespace().count() <= 4 {
                normalize_text(cleaned)
            } else {
                None
            }
        }
    }
}

fn from_first_occurrence(text: &str, format: &AnswerFormat) -> Option<String> {
    match format {
        AnswerFormat::Choice { options, bodies } => LABELLED_CHOICE
            .captures_iter(text)
            .find_map(|caps| {
                let letter = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()?
                    .as_str()
                    .chars()
                    .next()?;
                options.contains(&letter).then(|| letter.to_string())
            })
            .or_else(|| earliest_choice_mention(text, options, bodies)),
        AnswerFormat::Numeric { style } => NUMBER
            .find_iter(text)
            .find_map(|m| parse_number(m.as_str(), *style)),
        AnswerFormat::Text { expected, pattern } => {
            if let Some(expected) = expected {
                if phrase_position(&plain_words(text), &plain_words(expected)).is_some() {
                    return Some(expected.clone());
                }
            }
            let pattern = pattern.as_deref()?;
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.find(text).and_then(|m| normalize_text(m.as_str())),
                Err(e) => {
                    tracing::debug!("Skipping invalid answer pattern {:?}: {}", pattern, e);
                    None
                }
            }
        }
    }
}

/// Lowercase alphanumeric words joined by single spaces
fn plain_words(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word-aligned byte position of `phrase` in `words`, both from `plain_words`
fn phrase_position(words: &str, phrase: &str) -> Option<usize> {
    if phrase.is_empty() {
        return None;
    }
    format!(" {} ", words).find(&format!(" {} ", phrase))
}

/// The single option whose text appears in `segment`
fn choice_mentioned(segment: &str, options: &[char], bodies: &[String]) -> Option<String> {
    let words = plain_words(segment);
    let mut found = options
        .iter()
        .zip(bodies)
        .filter(|(_, body)| phrase_position(&words, body).is_some());
    match (found.next(), found.next()) {
        (Some((letter, _)), None) => Some(letter.to_string()),
        _ => None,
    }
}

/// The option whose text is mentioned first in `text`
fn earliest_choice_mention(text: &str, options: &[char], bodies: &[String]) -> Option<String> {
    let words = plain_words(text);
    options
        .iter()
        .zip(bodies)
        .filter_map(|(letter, body)| {
            phrase_position(&words, body).map(|pos| (pos, std::cmp::Reverse(body.len()), *letter))
        })
        .min()
        .map(|(_, _, letter)| letter.to_string())
}

/// Parse the text following a marker or inside `\boxed{}`
fn parse_segment(segment: &str, format: &AnswerFormat) -> Option<String> {
    if let Some(caps) = BOXED.captures(segment) {
        if let Some(inner) = caps.get(1) {
            if let Some(token) = parse_segment(inner.as_str(), format) {
                return Some(token);
            }
        }
    }

    match format {
        AnswerFormat::Choice { options, bodies } => parse_choice_after_marker(segment, options)
            .or_else(|| choice_mentioned(first_clause(segment), options, bodies)),
        AnswerFormat::Numeric { style } => NUMBER
            .find_iter(segment)
            .find_map(|m| parse_number(m.as_str(), *style)),
        AnswerFormat::Text { .. } => normalize_text(first_clause(segment)),
    }
}

/// Text up to the first comma, semicolon, line break or sentence end
fn first_clause(segment: &str) -> &str {
    let clause = segment
        .split(|c: char| matches!(c, ',' | ';' | '\n'))
        .next()
        .unwrap_or_default();
    clause.split(". ").next().unwrap_or_default()
}

fn parse_choice_after_marker(segment: &str, options: &[char]) -> Option<String> {
    let mut rest = strip_decorations(segment);
    for lead_in in CHOICE_LEAD_INS {
        if rest.len() > lead_in.len()
            && rest.is_char_boundary(lead_in.len())
            && rest[..lead_in.len()].eq_ignore_ascii_case(lead_in)
        {
            rest = strip_decorations(&rest[lead_in.len()..]);
            break;
        }
    }

    let mut chars = rest.chars();
    let letter = chars.next()?;
    let next = chars.next();
    let upper = letter.to_ascii_uppercase();
    if !letter.is_ascii_alphabetic() || !options.contains(&upper) {
        return None;
    }

    let accepted = if letter.is_ascii_uppercase() {
        next.map_or(true, |c| !c.is_alphanumeric())
    } else {
        matches!(next, None | Some(')'))
    };
    accepted.then(|| upper.to_string())
}

/// A line that is only an option letter, optionally followed by its text
fn parse_choice_line(line: &str, options: &[char]) -> Option<String> {
    let mut chars = line.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_uppercase() || !options.contains(&letter) {
        return None;
    }
    match chars.next() {
        None | Some(')') | Some('.') | Some(':') => Some(letter.to_string()),
        _ => None,
    }
}

fn is_decoration(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '*' | '_'
                | '~'
                | '`'
                | '"'
                | '\''
                | '\u{201C}'
                | '\u{201D}'
                | '\u{201E}'
                | '\u{2018}'
                | '\u{2019}'
                | '\u{00AB}'
                | '\u{00BB}'
                | '['
                | ']'
                | '('
                | ')'
                | '{'
                | '}'
                | '<'
                | '>'
                | ':'
                | '.'
                | ','
                | ';'
                | '!'
                | '?'
                | '='
                | '#'
                | '|'
        )
}

fn strip_decorations(s: &str) -> &str {
    s.trim_matches(is_decoration)
}

fn normalize_text(s: &str) -> Option<String> {
    let cleaned = strip_decorations(s);
    let normalized = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Canonical decimal-point rendering of a number written in `style`.
///
/// The style's thousands separator is honoured only when every group after
/// it has exactly three digits; otherwise the other reading is tried, so
/// `3.5` still reads as three and a half in a decimal-comma language.
pub fn parse_number(token: &str, style: NumberStyle) -> Option<String> {
    let mut s = token
        .trim()
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '$' | '€' | '£' | '%'));

    let mut negative = false;
    if let Some(first) = s.chars().next() {
        match first {
            '-' | '\u{2212}' => {
                negative = true;
                s = &s[first.len_utf8()..];
            }
            '+' => s = &s[1..],
            _ => {}
        }
    }

    let starts_and_ends_with_digit = s.chars().next().is_some_and(|c| c.is_ascii_digit())
        && s.chars().last().is_some_and(|c| c.is_ascii_digit());
    if !starts_and_ends_with_digit {
        return None;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ' ' | '\u{00A0}' | '\u{202F}'))
    {
        return None;
    }

    let compact: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00A0}' | '\u{202F}'))
        .collect();

    let (decimal, thousands) = style.separators();
    let (int_part, frac_part) = split_number(&compact, decimal, thousands)
        .or_else(|| split_number(&compact, thousands, decimal))?;

    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if negative && (int_part != "0" || !frac_part.is_empty()) {
        out.push('-');
    }
    out.push_str(int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    Some(out)
}

/// Split into digit-only integer and fraction parts, validating grouping
fn split_number(compact: &str, decimal: char, thousands: char) -> Option<(String, String)> {
    let (int_raw, frac) = match compact.rsplit_once(decimal) {
        Some((int_raw, frac)) => (int_raw, frac),
        None => (compact, ""),
    };
    if int_raw.contains(decimal) || frac.contains(thousands) {
        return None;
    }
    if compact.contains(decimal) && frac.is_empty() {
        return None;
    }

    let groups: Vec<&str> = int_raw.split(thousands).collect();
    let grouped_ok = groups.len() == 1
        || ((1..=3).contains(&groups[0].len()) && groups[1..].iter().all(|g| g.len() == 3));
    if !grouped_ok || groups.iter().any(|g| g.is_empty()) {
        return None;
    }

    Some((groups.concat(), frac.to_string()))
}

/// Normalised form of an answer string for the given format
pub fn normalize_answer(text: &str, format: &AnswerFormat) -> Option<String> {
    match format {
        AnswerFormat::Choice { options, bodies } => {
            let cleaned = strip_decorations(text);
            let wanted = plain_words(cleaned);
            parse_choice_line(&cleaned.to_uppercase(), options)
                .or_else(|| parse_choice_after_marker(cleaned, options))
                .or_else(|| {
                    options
                        .iter()
                        .zip(bodies)
                        .find(|(_, body)| !body.is_empty() && **body == wanted)
                        .map(|(label, _)| label.to_string())
                })
        }
        AnswerFormat::Numeric { style } => parse_number(strip_decorations(text), *style).or_else(|| {
            NUMBER
                .find_iter(text)
                .find_map(|m| parse_number(m.as_str(), *style))
        }),
        AnswerFormat::Text { .. } => normalize_text(text),
    }
}

/// The question's canonical answer, normalised like extracted tokens.
///
/// Canonical numbers are always written with a decimal point; a choice
/// answer may be given as its letter or as the option text.
pub fn canonical_answer(question: &Question, format: &AnswerFormat) -> Option<String> {
    match format {
        AnswerFormat::Numeric { .. } => normalize_answer(
            &question.answer,
            &AnswerFormat::Numeric {
                style: NumberStyle::DecimalPoint,
            },
        ),
        _ => normalize_answer(&question.answer, format),
    }
}

/// Option text without a leading `B)` style label
fn choice_body(choice: &str) -> &str {
    let trimmed = choice.trim_start();
    let mut chars = trimmed.char_indices();
    match (chars.next(), chars.next()) {
        (Some((_, letter)), Some((idx, ')' | '.' | ':'))) if letter.is_ascii_alphabetic() => {
            &trimmed[idx + 1..]
        }
        _ => trimmed,
    }
}
