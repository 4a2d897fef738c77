#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storefront catalog records and the artifacts a harvest run persists.
//!
//! A [`Product`] is decoded from one entry of a listing page, enriched once
//! with [`FetchMetadata`] and (optionally) an [`HtmlMetadata`] block, and
//! then written to disk. The source record itself is never rewritten, so the
//! persisted JSON is the original record plus the two enrichment blocks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A catalog product as returned by the storefront API.
///
/// The source record is kept untouched; the typed accessors below are
/// nullable views over it. Storefront data is loosely typed (`null` where a
/// string is expected, numeric prices, tags as an array or a comma joined
/// string), so any field may be absent or of an unexpected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Run metadata attached by the pipeline.
    #[serde(
        rename = "_metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fetch_metadata: Option<FetchMetadata>,
    /// Canonical-keyed fields extracted from the product page.
    #[serde(
        rename = "_html_metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub html_metadata: Option<HtmlMetadata>,
    #[serde(flatten)]
    record: serde_json::Map<String, serde_json::Value>,
}

/// An image URL together with its position in the product's image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub index: usize,
    pub url: String,
}

/// The `_metadata` enrichment block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub fetched_at: DateTime<Utc>,
    pub product_url: String,
    pub api_url: String,
}

impl Product {
    /// Decodes a raw listing entry.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the entry is not an object, or if it
    /// already carries a malformed enrichment block.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.record.get(key).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.text("handle")
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.text("title")
    }

    /// Publisher for books.
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.text("vendor")
    }

    #[must_use]
    pub fn product_type(&self) -> Option<&str> {
        self.text("product_type")
    }

    /// Numeric storefront id, given either as a number or a digit string.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        match self.record.get("id")? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The first variant's SKU, which is the ISBN for books.
    #[must_use]
    pub fn isbn(&self) -> Option<String> {
        first_sku(self.record.get("variants"))
    }

    /// Base name for this product's image files: the ISBN, else the numeric
    /// id, else the handle.
    #[must_use]
    pub fn image_base_name(&self) -> String {
        self.isbn()
            .or_else(|| self.id().map(|id| id.to_string()))
            .unwrap_or_else(|| self.handle().unwrap_or_default().to_owned())
    }

    /// Image URLs in list order, skipping entries with no `src`.
    #[must_use]
    pub fn image_descriptors(&self) -> Vec<ImageDescriptor> {
        self.record
            .get("images")
            .and_then(serde_json::Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .enumerate()
                    .filter_map(|(index, image)| {
                        image
                            .get("src")
                            .and_then(serde_json::Value::as_str)
                            .filter(|src| !src.is_empty())
                            .map(|src| ImageDescriptor {
                                index,
                                url: src.to_owned(),
                            })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compact summary used in the run summary file. Missing or non-string
    /// fields become empty strings.
    #[must_use]
    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            handle: self.handle().unwrap_or_default().to_owned(),
            title: self.title().unwrap_or_default().to_owned(),
            vendor: self.vendor().unwrap_or_default().to_owned(),
            product_type: self.product_type().unwrap_or_default().to_owned(),
            isbn: self.isbn().unwrap_or_default(),
        }
    }
}

/// SKU of the first variant; numeric SKUs are rendered as digits.
fn first_sku(variants: Option<&serde_json::Value>) -> Option<String> {
    let sku = variants?.as_array()?.first()?.get("sku")?;
    let sku = match sku {
        serde_json::Value::String(s) => s.trim().to_owned(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(sku).filter(|s| !s.is_empty())
}

/// The recognized term names of a product page's detail list.
///
/// Serialized under the canonical (English) key; [`Self::source_label`] is
/// the term as it appears on the page.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetadataField {
    Keywords,
    LibraryClassification,
    Topics,
    PublisherAlt,
    PublicationDate,
    Binding,
    PageCount,
    Dimensions,
    Weight,
}

/// How a field's definition text is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Cleaned flattened text.
    Text,
    /// Ordered list of strings.
    List,
    /// First integer in the text.
    Integer,
    /// Up to three millimeter values.
    Dimensions,
}

impl MetadataField {
    pub const ALL: &[Self] = &[
        Self::Keywords,
        Self::LibraryClassification,
        Self::Topics,
        Self::PublisherAlt,
        Self::PublicationDate,
        Self::Binding,
        Self::PageCount,
        Self::Dimensions,
        Self::Weight,
    ];

    /// The term label used on the storefront's product pages.
    #[must_use]
    pub const fn source_label(self) -> &'static str {
        match self {
            Self::Keywords => "Avainsanat",
            Self::LibraryClassification => "Kirjastoluokka",
            Self::Topics => "Aiheet",
            Self::PublisherAlt => "Kustantaja",
            Self::PublicationDate => "Julkaisu",
            Self::Binding => "Sidosasu",
            Self::PageCount => "Sivumäärä",
            Self::Dimensions => "Mitat",
            Self::Weight => "Paino",
        }
    }

    /// Looks up the field for a page term; unrecognized terms yield `None`.
    #[must_use]
    pub fn from_source_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.source_label() == label)
    }

    #[must_use]
    pub const fn kind(self) -> FieldKind {
        match self {
            Self::Keywords | Self::Topics => FieldKind::List,
            Self::PageCount | Self::Weight => FieldKind::Integer,
            Self::Dimensions => FieldKind::Dimensions,
            Self::LibraryClassification
            | Self::PublisherAlt
            | Self::PublicationDate
            | Self::Binding => FieldKind::Text,
        }
    }
}

/// A typed value extracted from a product page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    List(Vec<String>),
    Dimensions(Vec<i64>),
    Text(String),
}

/// Fields extracted from one product page, keyed by [`MetadataField`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HtmlMetadata(pub BTreeMap<MetadataField, MetadataValue>);

impl HtmlMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: MetadataField, value: MetadataValue) {
        self.0.insert(field, value);
    }

    #[must_use]
    pub fn get(&self, field: MetadataField) -> Option<&MetadataValue> {
        self.0.get(&field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-product entry of the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub handle: String,
    pub title: String,
    pub vendor: String,
    pub product_type: String,
    pub isbn: String,
}

impl ProductSummary {
    /// Builds a summary straight from a raw listing entry. Entries that are
    /// not objects yield an empty summary.
    #[must_use]
    pub fn from_raw(value: &serde_json::Value) -> Self {
        Product::from_value(value.clone())
            .as_ref()
            .map(Product::summary)
            .unwrap_or_default()
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The server returned an empty page.
    Exhausted,
    /// The configured page ceiling was reached.
    PageLimit,
    /// The configured product cap was reached.
    ItemLimit,
    /// A page could not be fetched; later pages were never requested.
    PageFailed { page: u32 },
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub books_fetched: u64,
    pub images_downloaded: u64,
    pub errors: u64,
    pub throttle_hits: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Concurrency and delay settings in effect for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub max_concurrent_requests: usize,
    pub request_delay_ms: u64,
    pub html_request_delay_ms: u64,
    pub download_images: bool,
    pub fetch_html_metadata: bool,
    /// Adaptive delay at the end of the run.
    pub final_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationSummary {
    pub pages_fetched: u32,
    pub stop_reason: StopReason,
}

/// Contents of the aggregate `metadata.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scraped_at: DateTime<Utc>,
    pub total_products: usize,
    pub statistics: StatisticsSnapshot,
    pub config: ConfigSnapshot,
    pub pagination: PaginationSummary,
    pub products_summary: Vec<ProductSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "id": 8_123_456_789_u64,
            "handle": "hyvat-tyypit-9789510405666",
            "title": "Hyvät tyypit",
            "vendor": "WSOY",
            "product_type": "Kovakantinen",
            "tags": ["Lasten", "Uutuus"],
            "body_html": "<p>Kuvaus</p>",
            "published_at": "2024-01-15T10:00:00+02:00",
            "images": [
                {"id": 1, "src": "https://cdn.example.com/a.jpg", "position": 1},
                {"id": 2, "src": "", "position": 2},
                {"id": 3, "src": "https://cdn.example.com/c.png", "position": 3}
            ],
            "variants": [
                {"id": 11, "sku": "9789510405666", "price": "24.90",
                 "available": true, "compare_at_price": null, "grams": 450}
            ]
        })
    }

    #[test]
    fn typed_views_over_listing_entry() {
        let product = Product::from_value(sample()).unwrap();
        assert_eq!(product.handle(), Some("hyvat-tyypit-9789510405666"));
        assert_eq!(product.title(), Some("Hyvät tyypit"));
        assert_eq!(product.vendor(), Some("WSOY"));
        assert_eq!(product.id(), Some(8_123_456_789));
        assert_eq!(product.product_type(), Some("Kovakantinen"));
        assert_eq!(product.isbn().as_deref(), Some("9789510405666"));
    }

    #[test]
    fn serializes_back_to_the_source_record_plus_enrichment() {
        let mut product = Product::from_value(sample()).unwrap();
        assert_eq!(serde_json::to_value(&product).unwrap(), sample());

        product.fetch_metadata = Some(FetchMetadata {
            fetched_at: Utc::now(),
            product_url: "https://kirja.fi/products/x".to_owned(),
            api_url: "https://kirja.fi/products/x.json".to_owned(),
        });
        product.html_metadata = Some(HtmlMetadata::new());

        let mut back = serde_json::to_value(&product).unwrap();
        let back = back.as_object_mut().unwrap();
        assert!(back.remove("_metadata").is_some());
        assert!(back.remove("_html_metadata").is_some());
        assert_eq!(serde_json::Value::Object(back.clone()), sample());
    }

    #[test]
    fn minimal_record_gains_no_keys() {
        let product = Product::from_value(serde_json::json!({"handle": "eka"})).unwrap();
        assert_eq!(
            serde_json::to_value(&product).unwrap(),
            serde_json::json!({"handle": "eka"})
        );
        assert_eq!(product.title(), None);
        assert!(product.image_descriptors().is_empty());
    }

    #[test]
    fn tolerates_nulls_and_numeric_fields() {
        let raw = serde_json::json!({
            "id": "42",
            "handle": "toka",
            "vendor": null,
            "title": 5,
            "tags": null,
            "images": [{"src": null}, "bogus"],
            "variants": [{"sku": 9_789_510_000_001_u64, "price": 24.9, "compare_at_price": null}]
        });
        let product = Product::from_value(raw.clone()).unwrap();

        assert_eq!(product.vendor(), None);
        assert_eq!(product.title(), None);
        assert_eq!(product.id(), Some(42));
        assert!(product.image_descriptors().is_empty());
        assert_eq!(product.isbn().as_deref(), Some("9789510000001"));
        assert_eq!(serde_json::to_value(&product).unwrap(), raw);
    }

    #[test]
    fn non_object_entries_are_rejected() {
        assert!(Product::from_value(serde_json::json!(["handle"])).is_err());
        assert!(Product::from_value(serde_json::json!("eka")).is_err());
    }

    #[test]
    fn comma_separated_tags_are_kept_verbatim() {
        let raw = serde_json::json!({
            "handle": "x",
            "tags": "Lasten, Uutuus ,"
        });
        let product = Product::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&product).unwrap(), raw);
    }

    #[test]
    fn image_base_name_falls_back_to_id_then_handle() {
        let mut raw = sample();
        assert_eq!(
            Product::from_value(raw.clone()).unwrap().image_base_name(),
            "9789510405666"
        );

        raw["variants"][0]["sku"] = serde_json::json!("");
        assert_eq!(
            Product::from_value(raw.clone()).unwrap().image_base_name(),
            "8123456789"
        );

        raw.as_object_mut().unwrap().remove("id");
        assert_eq!(
            Product::from_value(raw).unwrap().image_base_name(),
            "hyvat-tyypit-9789510405666"
        );
    }

    #[test]
    fn image_descriptors_skip_missing_sources_but_keep_positions() {
        let product = Product::from_value(sample()).unwrap();
        let descriptors = product.image_descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].index, 0);
        assert_eq!(descriptors[1].index, 2);
    }

    #[test]
    fn metadata_fields_round_trip_through_source_labels() {
        for field in MetadataField::ALL {
            assert_eq!(
                MetadataField::from_source_label(field.source_label()),
                Some(*field)
            );
        }
        assert_eq!(MetadataField::from_source_label("Tuotekoodi"), None);
        assert_eq!(MetadataField::PageCount.to_string(), "page_count");
    }

    #[test]
    fn html_metadata_serializes_under_canonical_keys() {
        let mut metadata = HtmlMetadata::new();
        metadata.insert(MetadataField::PageCount, MetadataValue::Integer(312));
        metadata.insert(
            MetadataField::Dimensions,
            MetadataValue::Dimensions(vec![147, 222, 35]),
        );
        metadata.insert(
            MetadataField::Keywords,
            MetadataValue::List(vec!["a".to_owned(), "b".to_owned()]),
        );

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["page_count"], 312);
        assert_eq!(json["dimensions"], serde_json::json!([147, 222, 35]));
        assert_eq!(json["keywords"], serde_json::json!(["a", "b"]));

        let back: HtmlMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn summary_from_raw_tolerates_odd_records() {
        let summary = ProductSummary::from_raw(&serde_json::json!({
            "handle": "h",
            "title": 5,
            "vendor": null,
            "variants": []
        }));
        assert_eq!(summary.handle, "h");
        assert_eq!(summary.title, "");
        assert_eq!(summary.vendor, "");
        assert_eq!(summary.isbn, "");

        let numeric = ProductSummary::from_raw(&serde_json::json!({
            "variants": [{"sku": 123}]
        }));
        assert_eq!(numeric.isbn, "123");

        assert_eq!(
            ProductSummary::from_raw(&serde_json::json!("eka")),
            ProductSummary::default()
        );
    }

    #[test]
    fn stop_reason_serializes_with_tag() {
        let json = serde_json::to_value(StopReason::PageFailed { page: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"reason": "page_failed", "page": 7}));
    }
}
