use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use harvest_catalog_models::{RunSummary, StopReason};
use harvest_fetch::scripted::{ScriptedClient, ScriptedReply};
use harvest_pipeline::progress::ProgressCallback;
use harvest_pipeline::{HarvestConfig, RunCoordinator, RunOutcome};

const BASE: &str = "https://shop.test";

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("harvest_run_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(data_dir: &Path) -> HarvestConfig {
    HarvestConfig {
        base_url: BASE.to_owned(),
        max_concurrent_requests: 4,
        request_delay_ms: 1,
        html_request_delay_ms: 1,
        max_delay_ms: 4,
        max_retries: 3,
        retry_wait_min_ms: 1,
        retry_wait_max_ms: 2,
        batch_size: 2,
        data_dir: data_dir.to_path_buf(),
        ..HarvestConfig::default()
    }
}

fn listing(page: u32) -> String {
    format!("{BASE}/collections/all/products.json?page={page}")
}

fn page(products: &serde_json::Value) -> ScriptedReply {
    ScriptedReply::json(&serde_json::json!({ "products": products }))
}

fn completed(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => *summary,
        RunOutcome::NoProducts => panic!("expected a completed run"),
    }
}

fn book_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.join("books"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn two_page_catalog_without_enrichment() {
    let client = Arc::new(ScriptedClient::new());
    client.always(
        &listing(1),
        page(&serde_json::json!([
            {"id": 1, "handle": "eka", "title": "Eka", "variants": [{"sku": "111"}]},
            {"id": 2, "handle": "toka", "title": "Toka", "variants": [{"sku": "222"}]}
        ])),
    );
    client.always(&listing(2), page(&serde_json::json!([])));

    let dir = temp_dir("two_page");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client.clone(),
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(book_files(&dir), vec!["eka.json", "toka.json"]);
    assert_eq!(summary.statistics.books_fetched, 2);
    assert_eq!(summary.statistics.errors, 0);
    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.pagination.pages_fetched, 1);
    assert_eq!(summary.pagination.stop_reason, StopReason::Exhausted);
    assert_eq!(client.request_count(&listing(3)), 0);
    assert_eq!(client.total_requests(), 2);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("metadata.json")).unwrap()).unwrap();
    assert_eq!(written["total_products"], 2);
    assert_eq!(written["products_summary"][1]["isbn"], "222");
    assert_eq!(written["pagination"]["stop_reason"]["reason"], "exhausted");
    assert!(written["statistics"]["end_time"].is_string());
    assert_eq!(written["config"]["max_concurrent_requests"], 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn failing_image_is_counted_but_record_is_kept() {
    let client = Arc::new(ScriptedClient::new());
    client.always(
        &listing(1),
        page(&serde_json::json!([{
            "id": 9,
            "handle": "kuvaton",
            "variants": [{"sku": "9789510000009"}],
            "images": [{"src": "https://cdn.test/broken.jpg"}]
        }])),
    );
    client.always(&listing(2), page(&serde_json::json!([])));
    client.always("https://cdn.test/broken.jpg", ScriptedReply::status(500));

    let dir = temp_dir("broken_image");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client.clone(),
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(summary.statistics.images_downloaded, 0);
    assert_eq!(summary.statistics.errors, 1);
    assert_eq!(summary.statistics.books_fetched, 1);
    assert!(dir.join("books/kuvaton.json").exists());
    assert!(!dir.join("images/9789510000009.jpg").exists());
    assert_eq!(client.request_count("https://cdn.test/broken.jpg"), 3);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn product_without_handle_is_not_written() {
    let client = Arc::new(ScriptedClient::new());
    client.always(
        &listing(1),
        page(&serde_json::json!([
            {"id": 1, "handle": ""},
            {"id": 2, "handle": "oikea"}
        ])),
    );
    client.always(&listing(2), page(&serde_json::json!([])));

    let dir = temp_dir("no_handle");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client,
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(book_files(&dir), vec!["oikea.json"]);
    assert_eq!(summary.statistics.books_fetched, 1);
    assert_eq!(summary.statistics.errors, 0);
    assert_eq!(summary.total_products, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn enriches_records_with_page_metadata_and_adapts_to_throttling() {
    let client = Arc::new(ScriptedClient::new());
    client.always(
        &listing(1),
        page(&serde_json::json!([{"id": 5, "handle": "sotaromaani"}])),
    );
    client.always(&listing(2), page(&serde_json::json!([])));
    let product_page = format!("{BASE}/products/sotaromaani");
    client.push(&product_page, ScriptedReply::throttled(Some("0")));
    client.always(
        &product_page,
        ScriptedReply::html(
            "<html><body><dl>\
             <dt>Mitat</dt><dd>147 mm × 222 mm × 35 mm</dd>\
             <dt>Aiheet</dt><dd>sota • historia</dd>\
             <dt>Kieli</dt><dd>suomi</dd>\
             </dl></body></html>",
        ),
    );

    let dir = temp_dir("enrich");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            ..config(&dir)
        },
        client.clone(),
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(summary.statistics.throttle_hits, 1);
    assert_eq!(summary.statistics.errors, 0);
    assert_eq!(client.request_count(&product_page), 2);

    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("books/sotaromaani.json")).unwrap(),
    )
    .unwrap();
    let html = record["_html_metadata"].as_object().unwrap();
    assert_eq!(html["dimensions"], serde_json::json!([147, 222, 35]));
    assert_eq!(html["topics"], serde_json::json!(["sota", "historia"]));
    assert_eq!(html.len(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn failed_listing_page_stops_collection() {
    let client = Arc::new(ScriptedClient::new());
    client.always(&listing(1), page(&serde_json::json!([{"handle": "eka"}])));
    client.always(&listing(2), ScriptedReply::status(500));

    let dir = temp_dir("failed_page");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client.clone(),
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(summary.pagination.stop_reason, StopReason::PageFailed { page: 2 });
    assert_eq!(summary.statistics.errors, 1);
    assert_eq!(summary.statistics.books_fetched, 1);
    assert_eq!(client.request_count(&listing(2)), 5);
    assert_eq!(client.request_count(&listing(3)), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[derive(Default)]
struct AbandonFlag(AtomicBool);

impl ProgressCallback for AbandonFlag {
    fn products_collected(&self, _products: u64) {}
    fn batch_finished(&self, _batch_len: u64, _errors: u64) {}
    fn finish(&self, _processed: u64) {}
    fn abandon(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn empty_catalog_writes_nothing() {
    let client = Arc::new(ScriptedClient::new());
    client.always(&listing(1), page(&serde_json::json!([])));

    let dir = temp_dir("empty");
    let progress = Arc::new(AbandonFlag::default());
    let coordinator = RunCoordinator::new(config(&dir), client)
        .unwrap()
        .with_progress(progress.clone());

    assert_eq!(coordinator.run().await.unwrap(), RunOutcome::NoProducts);
    assert!(!dir.join("metadata.json").exists());
    assert!(progress.0.load(Ordering::SeqCst));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn listing_without_products_array_keeps_earlier_pages() {
    let client = Arc::new(ScriptedClient::new());
    client.always(&listing(1), page(&serde_json::json!([{"handle": "eka"}])));
    client.always(
        &listing(2),
        ScriptedReply::json(&serde_json::json!({"errors": "oops"})),
    );

    let dir = temp_dir("malformed_page");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client,
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert!(dir.join("books/eka.json").exists());
    assert_eq!(summary.pagination.stop_reason, StopReason::PageFailed { page: 2 });
    assert_eq!(summary.statistics.errors, 1);
    assert_eq!(summary.statistics.books_fetched, 1);
    assert!(dir.join("metadata.json").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn truncated_listing_body_is_refetched() {
    let client = Arc::new(ScriptedClient::new());
    client.always(&listing(1), page(&serde_json::json!([{"handle": "eka"}])));
    client.push(&listing(2), ScriptedReply::html(r#"{"products": [{"handle""#));
    client.push(&listing(2), page(&serde_json::json!([{"handle": "toka"}])));
    client.always(&listing(3), page(&serde_json::json!([])));

    let dir = temp_dir("truncated_page");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client.clone(),
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.pagination.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.statistics.errors, 0);
    assert_eq!(client.request_count(&listing(2)), 2);
    assert_eq!(book_files(&dir), vec!["eka.json", "toka.json"]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn loosely_typed_records_are_persisted_as_received() {
    let eka = serde_json::json!({"handle": "eka", "vendor": null});
    let toka = serde_json::json!({
        "handle": "toka",
        "variants": [{"sku": "1", "price": 24.9}]
    });
    let client = Arc::new(ScriptedClient::new());
    client.always(&listing(1), page(&serde_json::json!([eka.clone(), toka.clone()])));
    client.always(&listing(2), page(&serde_json::json!([])));

    let dir = temp_dir("loose_records");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client,
    )
    .unwrap();

    let summary = completed(coordinator.run().await.unwrap());

    assert_eq!(book_files(&dir), vec!["eka.json", "toka.json"]);
    assert_eq!(summary.statistics.books_fetched, 2);
    assert_eq!(summary.statistics.errors, 0);
    assert_eq!(summary.products_summary[1].isbn, "1");

    for (name, source) in [("eka", eka), ("toka", toka)] {
        let mut written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.join(format!("books/{name}.json"))).unwrap(),
        )
        .unwrap();
        let written = written.as_object_mut().unwrap();
        assert!(written.remove("_metadata").is_some());
        assert_eq!(serde_json::Value::Object(written.clone()), source);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn single_product_lookup_runs_full_pipeline() {
    let client = Arc::new(ScriptedClient::new());
    client.always(
        &format!("{BASE}/products/yksi.json"),
        ScriptedReply::json(&serde_json::json!({
            "product": {"id": 7, "handle": "yksi", "tags": "uutuus, dekkarit"}
        })),
    );

    let dir = temp_dir("lookup");
    let coordinator = RunCoordinator::new(
        HarvestConfig {
            download_images: false,
            fetch_html_metadata: false,
            ..config(&dir)
        },
        client,
    )
    .unwrap();

    assert!(coordinator.run_product("yksi").await.unwrap());

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("books/yksi.json")).unwrap())
            .unwrap();
    assert_eq!(record["tags"], "uutuus, dekkarit");
    assert_eq!(coordinator.stats().books_fetched(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let client = Arc::new(ScriptedClient::new());
    let result = RunCoordinator::new(
        HarvestConfig {
            batch_size: 0,
            ..HarvestConfig::default()
        },
        client,
    );
    assert!(result.is_err());
}
