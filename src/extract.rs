//! Field extraction from fetched profile pages.
//!
//! The profile page has no stable markup, so each fetch strategy comes with
//! its own way of finding the four fields: regular expressions over raw HTML,
//! positional CSS selectors over the rendered DOM, or label phrases over OCR
//! text. All rule tables are plain values built once and handed to the
//! extractor; nothing here is global or mutable.
//!
//! A field that cannot be found is recorded as absent. Absence is never
//! replaced by a placeholder value, since a substituted zero would look like a
//! real count.

use crate::error::{ElibError, Result};
use crate::fetch::{FetcherKind, PageContent};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Display name recorded when a strategy cannot localize the author's name
pub const UNKNOWN_NAME: &str = "Неизвестно";

/// Label preceding the total publication count
pub const PUBLISHES_LABEL: &str = "Число публикаций на elibrary.ru";

/// Label preceding the h-index
pub const HIRSH_LABEL: &str = "Индекс Хирша по всем публикациям на elibrary.ru";

/// Label preceding the number of publications cited at least once
pub const CITED_LABEL: &str = "Число публикаций автора, процитированных хотя бы один раз";

/// One semantic field of the profile page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    PublishesCount,
    CitedPublishesCount,
    HirshIndex,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::Name,
        Field::PublishesCount,
        Field::CitedPublishesCount,
        Field::HirshIndex,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::PublishesCount => "publishesCount",
            Field::CitedPublishesCount => "citedPublishesCount",
            Field::HirshIndex => "hirshIndex",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Raw text found for each field during one fetch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    values: BTreeMap<Field, Option<String>>,
}

impl RawExtraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a found value, trimmed
    pub fn set(&mut self, field: Field, value: impl AsRef<str>) {
        self.values
            .insert(field, Some(value.as_ref().trim().to_string()));
    }

    /// Record that a field could not be found
    pub fn mark_missing(&mut self, field: Field) {
        self.values.insert(field, None);
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).and_then(|v| v.as_deref())
    }

    /// Fields with a value
    pub fn found(&self) -> Vec<Field> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(f, _)| *f)
            .collect()
    }

    /// Fields that were searched for (or expected) but have no value
    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f).is_none())
            .collect()
    }
}

/// Regex rules over raw HTML, one per field; the first capture group is the value
#[derive(Debug, Clone)]
pub struct PatternRules {
    rules: Vec<(Field, Regex)>,
}

impl PatternRules {
    pub fn new(rules: &[(Field, &str)]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*field, re))
                    .map_err(|e| ElibError::Config(format!("Invalid pattern for {}: {}", field, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Rules for the profile page template as served by the site
    pub fn profile_page() -> Result<Self> {
        let cell = r##"</font></td><td align="center" class="midtext"><font color="#000000">"##;
        let publishes = format!(r">{}{}<a[^>]*>([^<]+)</a>", regex::escape(PUBLISHES_LABEL), cell);
        let hirsh = format!(r">{}{}([^<]+)</font>", regex::escape(HIRSH_LABEL), cell);
        let cited = format!(r">{}{}(\d+)[^<]*</font>", regex::escape(CITED_LABEL), cell);
        Self::new(&[
            (Field::Name, r"<title>(.+?) - Анализ публикационной активности</title>"),
            (Field::PublishesCount, publishes.as_str()),
            (Field::HirshIndex, hirsh.as_str()),
            (Field::CitedPublishesCount, cited.as_str()),
        ])
    }

    fn extract(&self, text: &str) -> RawExtraction {
        let mut data = RawExtraction::new();
        for (field, re) in &self.rules {
            match re.captures(text).and_then(|caps| caps.get(1)) {
                Some(m) => {
                    debug!(field = %field, value = m.as_str().trim(), "Extracted value");
                    data.set(*field, m.as_str());
                }
                None => {
                    warn!(field = %field, pattern = re.as_str(), "Pattern did not match");
                    data.mark_missing(*field);
                }
            }
        }
        data
    }
}

/// Positional CSS selectors over the rendered profile DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorTable {
    selectors: Vec<(Field, String)>,
}

impl SelectorTable {
    pub fn new(selectors: Vec<(Field, String)>) -> Self {
        Self { selectors }
    }

    /// Selectors for the current profile layout
    pub fn profile_page() -> Self {
        const BLOCK: &str = "#thepage > table > tbody > tr > td > table:nth-child(1) > tbody > tr > td:nth-child(2) > form > table > tbody > tr:nth-child(2) > td:nth-child(1)";
        let stat = |row: u32| {
            format!(
                "{} > table:nth-child(5) > tbody > tr:nth-child({}) > td:nth-child(3) > font",
                BLOCK, row
            )
        };
        Self::new(vec![
            (
                Field::Name,
                format!(
                    "{} > table:nth-child(1) > tbody > tr > td > div > font:nth-child(1) > b",
                    BLOCK
                ),
            ),
            (Field::PublishesCount, format!("{} > a", stat(4))),
            (Field::HirshIndex, stat(12)),
            (Field::CitedPublishesCount, stat(18)),
        ])
    }

    /// Replace the selector for one field, keeping the rest
    pub fn with_override(mut self, field: Field, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        match self.selectors.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = selector,
            None => self.selectors.push((field, selector)),
        }
        self
    }

    fn extract(&self, html: &str) -> RawExtraction {
        let document = Html::parse_document(html);
        let mut data = RawExtraction::new();

        // A broken selector only costs its own field
        for (field, css) in &self.selectors {
            let selector = match Selector::parse(css) {
                Ok(s) => s,
                Err(e) => {
                    warn!(field = %field, selector = css.as_str(), error = %e, "Invalid selector");
                    data.mark_missing(*field);
                    continue;
                }
            };

            let text = document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>())
                .filter(|t| !t.trim().is_empty());

            match text {
                Some(t) => data.set(*field, t),
                None => {
                    warn!(field = %field, selector = css.as_str(), "Selector matched nothing");
                    data.mark_missing(*field);
                }
            }
        }
        data
    }
}

/// Label phrases searched in recognized text; the number after a label is its value
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Vec<(Field, Regex)>,
}

impl LabelTable {
    pub fn new(labels: &[(Field, &str)]) -> Result<Self> {
        let labels = labels
            .iter()
            .map(|(field, phrase)| {
                Regex::new(&format!(r"{}\s*([\d.,]+)", regex::escape(phrase)))
                    .map(|re| (*field, re))
                    .map_err(|e| ElibError::Config(format!("Invalid label for {}: {}", field, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { labels })
    }

    pub fn profile_page() -> Result<Self> {
        Self::new(&[
            (Field::PublishesCount, PUBLISHES_LABEL),
            (Field::HirshIndex, HIRSH_LABEL),
            (Field::CitedPublishesCount, CITED_LABEL),
        ])
    }

    fn extract(&self, text: &str) -> RawExtraction {
        let mut data = RawExtraction::new();
        // Labels do not localize the name on a screenshot
        data.set(Field::Name, UNKNOWN_NAME);

        for (field, re) in &self.labels {
            match re.captures(text).and_then(|caps| caps.get(1)) {
                Some(m) => data.set(*field, m.as_str()),
                None => {
                    warn!(field = %field, "Label not found in recognized text");
                    data.mark_missing(*field);
                }
            }
        }
        data
    }
}

/// How a fetched page is turned into raw field text
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    Patterns(PatternRules),
    Selectors(SelectorTable),
    Labels(LabelTable),
}

impl ExtractionStrategy {
    /// Default rules matching the content a fetcher of `kind` produces
    pub fn for_fetcher(kind: FetcherKind) -> Result<Self> {
        Ok(match kind {
            FetcherKind::Http => Self::Patterns(PatternRules::profile_page()?),
            FetcherKind::Browser => Self::Selectors(SelectorTable::profile_page()),
            FetcherKind::Ocr => Self::Labels(LabelTable::profile_page()?),
        })
    }

    pub fn extract(&self, content: &PageContent) -> RawExtraction {
        extract(content, self)
    }
}

/// Locate the profile fields in `content` using `strategy`
pub fn extract(content: &PageContent, strategy: &ExtractionStrategy) -> RawExtraction {
    let text = content.as_str();
    let data = match strategy {
        ExtractionStrategy::Patterns(rules) => rules.extract(text),
        ExtractionStrategy::Selectors(table) => table.extract(text),
        ExtractionStrategy::Labels(labels) => labels.extract(text),
    };
    debug!(found = ?data.found(), missing = ?data.missing(), "Extraction complete");
    data
}

/// Parse a scraped count such as `"42 [1]"`, `"1,234"`, `"1 204"` or `"17 (35%)"`.
///
/// Footnote markers and everything after them are cut off. The first token
/// carrying a digit starts the number; following three-digit groups are
/// thousands (space or NBSP separated). Remaining non-digits are stripped.
pub fn parse_count(raw: &str) -> Option<u32> {
    let head = raw.split(['[', '(']).next().unwrap_or(raw);
    let mut tokens = head
        .split_whitespace()
        .skip_while(|t| !t.chars().any(|c| c.is_ascii_digit()));
    let mut digits: String = tokens.next()?.chars().filter(char::is_ascii_digit).collect();
    for group in tokens.take_while(|t| t.len() == 3 && t.chars().all(|c| c.is_ascii_digit())) {
        digits.push_str(group);
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_HTML: &str = r##"<html><head><title>Иванов Иван Иванович - Анализ публикационной активности</title></head>
<body><table>
<tr><td><font>Число публикаций на elibrary.ru</font></td><td align="center" class="midtext"><font color="#000000"><a href="author_items.asp?id=5">42 [1]</a></font></td></tr>
<tr><td><font>Индекс Хирша по всем публикациям на elibrary.ru</font></td><td align="center" class="midtext"><font color="#000000">7</font></td></tr>
<tr><td><font>Число публикаций автора, процитированных хотя бы один раз</font></td><td align="center" class="midtext"><font color="#000000">30 (71,4%)</font></td></tr>
</table></body></html>"##;

    #[test]
    fn test_patterns_extract_all_fields() {
        let strategy = ExtractionStrategy::for_fetcher(FetcherKind::Http).expect("rules compile");
        let data = extract(&PageContent::Html(PROFILE_HTML.to_string()), &strategy);

        assert_eq!(data.get(Field::Name), Some("Иванов Иван Иванович"));
        assert_eq!(data.get(Field::PublishesCount), Some("42 [1]"));
        assert_eq!(data.get(Field::HirshIndex), Some("7"));
        assert_eq!(data.get(Field::CitedPublishesCount), Some("30"));
        assert!(data.missing().is_empty());
    }

    #[test]
    fn test_patterns_record_absence() {
        let strategy = ExtractionStrategy::for_fetcher(FetcherKind::Http).expect("rules compile");
        let html = "<html><head><title>Петров П. - Анализ публикационной активности</title></head></html>";
        let data = extract(&PageContent::Html(html.to_string()), &strategy);

        assert_eq!(data.get(Field::Name), Some("Петров П."));
        assert_eq!(
            data.missing(),
            vec![Field::PublishesCount, Field::CitedPublishesCount, Field::HirshIndex]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let rules = PatternRules::new(&[(Field::HirshIndex, r"h=(\d+)")]).expect("compiles");
        let data = rules.extract("h=3 h=9");
        assert_eq!(data.get(Field::HirshIndex), Some("3"));
    }

    #[test]
    fn test_selectors_read_elements_independently() {
        let table = SelectorTable::new(vec![
            (Field::Name, "div.name > b".to_string()),
            (Field::PublishesCount, "td.pubs".to_string()),
            (Field::HirshIndex, "td.missing".to_string()),
            (Field::CitedPublishesCount, "td[[broken".to_string()),
        ]);
        let html = r#"<div class="name"><b>Сидорова А.</b></div><table><tr><td class="pubs"> 12 </td></tr></table>"#;
        let data = extract(
            &PageContent::Html(html.to_string()),
            &ExtractionStrategy::Selectors(table),
        );

        assert_eq!(data.get(Field::Name), Some("Сидорова А."));
        assert_eq!(data.get(Field::PublishesCount), Some("12"));
        assert_eq!(data.get(Field::HirshIndex), None);
        assert_eq!(data.get(Field::CitedPublishesCount), None);
        assert_eq!(data.missing(), vec![Field::CitedPublishesCount, Field::HirshIndex]);
    }

    #[test]
    fn test_selector_override() {
        let table = SelectorTable::profile_page().with_override(Field::Name, "h1");
        let data = table.extract("<html><body><h1>Name Here</h1></body></html>");
        assert_eq!(data.get(Field::Name), Some("Name Here"));
        assert_eq!(data.get(Field::HirshIndex), None);
    }

    #[test]
    fn test_labels_from_recognized_text() {
        let text = "Число публикаций на elibrary.ru 1,204\n\
                    Индекс Хирша по всем публикациям на elibrary.ru\n15\n\
                    прочее";
        let strategy = ExtractionStrategy::for_fetcher(FetcherKind::Ocr).expect("labels compile");
        let data = extract(&PageContent::RecognizedText(text.to_string()), &strategy);

        assert_eq!(data.get(Field::Name), Some(UNKNOWN_NAME));
        assert_eq!(data.get(Field::PublishesCount), Some("1,204"));
        assert_eq!(data.get(Field::HirshIndex), Some("15"));
        assert_eq!(data.get(Field::CitedPublishesCount), None);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42 [1]"), Some(42));
        assert_eq!(parse_count("42[1]"), Some(42));
        assert_eq!(parse_count("1,204"), Some(1204));
        assert_eq!(parse_count("30 (71,4%)"), Some(30));
        assert_eq!(parse_count(" 7 "), Some(7));
        assert_eq!(parse_count("нет"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn test_parse_count_space_grouped_thousands() {
        assert_eq!(parse_count("1 204"), Some(1204));
        assert_eq!(parse_count("1\u{a0}204"), Some(1204));
        assert_eq!(parse_count("1\u{202f}204 567"), Some(1_204_567));
        assert_eq!(parse_count("1 204 [3]"), Some(1204));
        assert_eq!(parse_count("12 статей"), Some(12));
        assert_eq!(parse_count("12 34"), Some(12));
    }
}
