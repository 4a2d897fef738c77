//! Product page metadata extraction.
//!
//! Product pages carry bibliographic details as a `<dt>`/`<dd>` definition
//! list. Each recognized term is mapped to a canonical
//! [`MetadataField`] and its definition is coerced by the field's
//! [`FieldKind`]. Unrecognized terms are ignored. A coercion that fails
//! keeps the cleaned text instead of dropping the field.

use harvest_catalog_models::{FieldKind, HtmlMetadata, MetadataField, MetadataValue};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{parse_selector, ScrapeError};

const LIST_SEPARATOR: &str = " | ";
const BULLET: char = '•';

/// Parses product page HTML into [`HtmlMetadata`].
///
/// Selectors and patterns are compiled once; share one extractor across
/// all products.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    term: Selector,
    list_item: Selector,
    anchor: Selector,
    integer: Regex,
    number: Regex,
    bullet_split: Regex,
}

impl MetadataExtractor {
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if a selector or pattern fails to compile.
    pub fn new() -> Result<Self, ScrapeError> {
        Ok(Self {
            term: parse_selector("dt")?,
            list_item: parse_selector("li")?,
            anchor: parse_selector("a")?,
            integer: Regex::new(r"[0-9]+")?,
            number: Regex::new(r"[0-9]+(?:[.,][0-9]+)?")?,
            bullet_split: Regex::new(r"\s*•\s*")?,
        })
    }

    /// Extracts every recognized field from `html`.
    ///
    /// A term that appears more than once keeps its last definition.
    #[must_use]
    pub fn extract(&self, html: &str) -> HtmlMetadata {
        let document = Html::parse_document(html);
        let mut metadata = HtmlMetadata::new();

        for dt in document.select(&self.term) {
            let Some(dd) = next_definition(dt) else {
                continue;
            };

            let label: String = dt.text().map(str::trim).collect();
            let Some(field) = MetadataField::from_source_label(&label) else {
                continue;
            };

            let value = self.coerce(field.kind(), dd);
            log::debug!("Extracted metadata: {field} = {}", preview(&value));
            metadata.insert(field, value);
        }

        metadata
    }

    fn coerce(&self, kind: FieldKind, dd: ElementRef<'_>) -> MetadataValue {
        if kind == FieldKind::List {
            return MetadataValue::List(self.extract_list(dd));
        }

        let text = clean_text(&joined_text(dd, " "));
        match kind {
            FieldKind::Integer => self
                .parse_int(&text)
                .map_or(MetadataValue::Text(text), MetadataValue::Integer),
            FieldKind::Dimensions => self
                .parse_dimensions(&text)
                .map_or(MetadataValue::Text(text), MetadataValue::Dimensions),
            FieldKind::Text | FieldKind::List => MetadataValue::Text(text),
        }
    }

    /// Explicit `<li>` items win when there is more than one, then `<a>`
    /// items, then the definition text split on its separators.
    fn extract_list(&self, dd: ElementRef<'_>) -> Vec<String> {
        for selector in [&self.list_item, &self.anchor] {
            let items: Vec<String> = dd
                .select(selector)
                .map(|el| clean_text(&joined_text(el, " ")))
                .filter(|item| !item.is_empty())
                .collect();
            if items.len() > 1 {
                return items;
            }
        }

        self.split_items(&joined_text(dd, LIST_SEPARATOR))
    }

    /// Splits on bullets when present, otherwise on `|`.
    fn split_items(&self, text: &str) -> Vec<String> {
        let text = clean_text(text).replace('·', "•");
        if text.is_empty() {
            return Vec::new();
        }

        if text.contains(BULLET) {
            return self
                .bullet_split
                .split(&text)
                .map(clean_text)
                .filter(|part| !part.is_empty())
                .collect();
        }

        if text.contains('|') {
            return text
                .split('|')
                .map(clean_text)
                .filter(|part| !part.is_empty())
                .collect();
        }

        vec![text]
    }

    /// First run of digits in `text`.
    fn parse_int(&self, text: &str) -> Option<i64> {
        self.integer.find(text)?.as_str().parse().ok()
    }

    /// Up to three rounded millimetre values; needs at least two numbers.
    fn parse_dimensions(&self, text: &str) -> Option<Vec<i64>> {
        let text = clean_text(text).replace('×', "x");
        let numbers: Vec<&str> = self.number.find_iter(&text).map(|m| m.as_str()).collect();
        if numbers.len() < 2 {
            return None;
        }

        numbers
            .iter()
            .take(3)
            .map(|n| n.replace(',', ".").parse::<f64>().ok().map(round_to_i64))
            .collect()
    }
}

/// Replaces non-breaking spaces, collapses whitespace runs, and trims.
#[must_use]
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first `<dd>` among the following siblings of `dt`.
fn next_definition(dt: ElementRef<'_>) -> Option<ElementRef<'_>> {
    dt.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "dd")
}

/// Text nodes of `element`, each trimmed, empties dropped, joined by `sep`.
fn joined_text(element: ElementRef<'_>, sep: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

#[allow(clippy::cast_possible_truncation)]
fn round_to_i64(value: f64) -> i64 {
    value.round_ties_even() as i64
}

fn preview(value: &MetadataValue) -> String {
    let rendered = match value {
        MetadataValue::Text(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    rendered.chars().take(50).collect()
}
