//! Integration tests for article-pool.
//!
//! Workers are stand-ins built from `cat` and `sh -c` one-liners so the
//! pool, the exchange and the fallback chain run against real processes.

use article_pool::{
    ArticleError, ArticleProcessor, Document, ExtractRequest, ExtractionOptions,
    FallbackExtractor, Mode, ProcessorConfig, Result, WorkerCommand,
};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::tempdir;

const ARTICLE: &str = r#"<html lang="en"><head><title>Harbor Reopens</title>
<meta property="og:site_name" content="Coast Daily"></head>
<body><article>
<p>The harbor reopened on Tuesday after three weeks of dredging, and the first
fishing boats were back at the docks before sunrise.</p>
<p>Harbor officials said the deeper channel will let larger vessels unload cargo
without waiting for high tide, which should shorten delivery times.</p>
<p>Local businesses along the waterfront welcomed the news, saying the closure had
cut foot traffic by nearly half during what is normally a busy season.</p>
</article></body></html>"#;

fn config(command: WorkerCommand) -> ProcessorConfig {
    ProcessorConfig::new()
        .with_pool_size(1)
        .with_exchange_timeout(Duration::from_secs(5))
        .with_max_restart_attempts(2)
        .with_command(command.with_stop_timeout(Duration::from_secs(2)))
}

fn echo_worker() -> WorkerCommand {
    WorkerCommand::new("cat")
}

fn silent_worker() -> WorkerCommand {
    WorkerCommand::new("sh").args(["-c", "exec sleep 30"])
}

fn missing_worker() -> WorkerCommand {
    WorkerCommand::new("/nonexistent/article-worker")
}

fn mode(doc: &Document) -> Mode {
    Mode::of(doc).expect("every result carries a mode")
}

struct Exploding;

impl FallbackExtractor for Exploding {
    fn name(&self) -> &'static str {
        "exploding"
    }

    fn extract(&self, _request: &ExtractRequest) -> Result<Option<Document>> {
        panic!("extractor bug")
    }
}

#[tokio::test]
async fn test_two_healthy_workers_serve_concurrent_requests() {
    let processor = ArticleProcessor::new(config(echo_worker()).with_pool_size(2));
    processor.start().await.unwrap();

    let (a, b) = tokio::join!(
        processor.process_article("<p>first</p>", "https://a.example/1"),
        processor.process_article("<p>second</p>", "https://a.example/2"),
    );
    assert_eq!(mode(&a), Mode::External);
    assert_eq!(mode(&b), Mode::External);
    assert_eq!(a["html"], "<p>first</p>");
    assert_eq!(b["html"], "<p>second</p>");

    let stats = processor.pool().stats();
    assert_eq!(stats.worker_count, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.total_jobs_completed, 2);
    assert_eq!(stats.total_restarts, 0);

    processor.shutdown().await;
}

#[tokio::test]
async fn test_external_result_is_worker_json_plus_mode() {
    let processor = ArticleProcessor::new(config(echo_worker()));
    let options = ExtractionOptions {
        char_threshold: Some(500),
        classes_to_preserve: vec!["caption".into()],
        ..Default::default()
    };
    let request = ExtractRequest::new("<p>line one\nline two</p>", "https://a.example/")
        .with_options(options);

    let mut doc = processor.process(&request).await;
    assert_eq!(doc.remove("mode"), Some(json!("external")));
    assert_eq!(Value::Object(doc), serde_json::to_value(&request).unwrap());

    processor.shutdown().await;
}

#[tokio::test]
async fn test_no_crosstalk_between_concurrent_requests() {
    let processor = ArticleProcessor::new(config(echo_worker()).with_pool_size(2));
    processor.start().await.unwrap();

    let html: Vec<String> = (0..6).map(|i| format!("<p>request {i}</p>")).collect();
    let (r0, r1, r2, r3, r4, r5) = tokio::join!(
        processor.process_article(&html[0], ""),
        processor.process_article(&html[1], ""),
        processor.process_article(&html[2], ""),
        processor.process_article(&html[3], ""),
        processor.process_article(&html[4], ""),
        processor.process_article(&html[5], ""),
    );
    for (doc, sent) in [r0, r1, r2, r3, r4, r5].iter().zip(&html) {
        assert_eq!(mode(doc), Mode::External);
        assert_eq!(doc["html"], json!(sent));
    }
    assert_eq!(processor.pool().stats().total_jobs_completed, 6);

    processor.shutdown().await;
}

#[tokio::test]
async fn test_timeout_discards_worker_and_falls_back() {
    let processor = ArticleProcessor::new(
        config(silent_worker()).with_exchange_timeout(Duration::from_millis(100)),
    );
    processor.start().await.unwrap();
    let before = processor.pool().stats().slots[0].pid;

    let doc = processor.process_article(ARTICLE, "https://coast.example/harbor").await;
    assert_ne!(mode(&doc), Mode::External);

    let stats = processor.pool().stats();
    let slot = &stats.slots[0];
    assert_eq!(slot.restarts, 1);
    assert!(slot.running);
    assert!(slot.pid.is_some());
    assert_ne!(slot.pid, before);
    assert_eq!(slot.jobs_completed, 0);

    processor.shutdown().await;
}

#[tokio::test]
async fn test_timeout_uses_primary_fallback_for_articles() {
    let processor = ArticleProcessor::new(
        config(silent_worker()).with_exchange_timeout(Duration::from_millis(100)),
    );

    let doc = processor.process_article(ARTICLE, "https://coast.example/harbor").await;
    assert_eq!(mode(&doc), Mode::FallbackPrimary);
    assert_eq!(doc["siteName"], "Coast Daily");
    assert!(doc["textContent"].as_str().unwrap().contains("dredging"));

    processor.shutdown().await;
}

#[tokio::test]
async fn test_invalid_command_degrades_but_never_errors() {
    let processor = ArticleProcessor::new(config(missing_worker()));
    assert!(matches!(
        processor.start().await,
        Err(ArticleError::Spawn { .. })
    ));
    assert!(!processor.pool().is_initialized());

    for _ in 0..4 {
        let doc = processor.process_article(ARTICLE, "").await;
        assert_ne!(mode(&doc), Mode::External);
    }

    assert_eq!(processor.pool().stats().total_restarts, 2);
    assert!(matches!(
        processor.pool().acquire().await,
        Err(ArticleError::PoolDegraded { restarts: 2, .. })
    ));
}

#[tokio::test]
async fn test_empty_markup_comes_back_raw() {
    let processor = ArticleProcessor::new(config(missing_worker()));

    let doc = processor.process_article("", "").await;
    assert_eq!(mode(&doc), Mode::Raw);
    assert_eq!(doc["content"], "");
    assert!(doc.keys().all(|k| ["content", "mode", "error"].contains(&k.as_str())));
}

#[tokio::test]
async fn test_panicking_fallbacks_still_return_raw() {
    let processor =
        ArticleProcessor::new(config(missing_worker())).with_fallbacks(Exploding, Exploding);

    let doc = processor.process_article("<p>keep me</p>", "").await;
    assert_eq!(mode(&doc), Mode::Raw);
    assert_eq!(doc["content"], "<p>keep me</p>");
    assert!(doc["error"].as_str().unwrap().contains("extractor bug"));
}

#[tokio::test]
async fn test_requests_after_shutdown_fall_back() {
    let processor = ArticleProcessor::new(config(echo_worker()));
    processor.start().await.unwrap();
    processor.shutdown().await;
    assert!(processor.pool().is_closed());

    let doc = processor.process_article(ARTICLE, "").await;
    assert_ne!(mode(&doc), Mode::External);
    assert!(matches!(
        processor.pool().acquire().await,
        Err(ArticleError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_worker_that_exits_is_replaced() {
    // Answers one request, then exits.
    let worker = WorkerCommand::new("sh").args(["-c", r#"read line; echo '{"title":"once"}'"#]);
    let processor = ArticleProcessor::new(config(worker));
    processor.start().await.unwrap();

    let first = processor.process_article("<p>a</p>", "").await;
    assert_eq!(mode(&first), Mode::External);
    assert_eq!(first["title"], "once");

    // Either the exit is noticed on release or the next exchange hits EOF;
    // both paths leave a live replacement behind.
    let second = processor.process_article("<p>b</p>", "").await;
    let third = processor.process_article("<p>c</p>", "").await;
    assert!([&second, &third].iter().any(|d| mode(d) == Mode::External));
    assert!(processor.pool().stats().total_restarts >= 1);

    processor.shutdown().await;
}

#[tokio::test]
async fn test_scripted_worker_from_file() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("worker.sh");
    std::fs::write(
        &script,
        "while IFS= read -r line; do echo '{\"title\":\"scripted\",\"length\":42}'; done\n",
    )
    .unwrap();

    let worker = WorkerCommand::new("sh").arg(script.to_string_lossy());
    let processor = ArticleProcessor::new(config(worker));
    processor.start().await.unwrap();

    for _ in 0..3 {
        let doc = processor.process_article(ARTICLE, "").await;
        assert_eq!(mode(&doc), Mode::External);
        assert_eq!(doc["title"], "scripted");
        assert_eq!(doc["length"], 42);
    }
    assert_eq!(processor.pool().stats().slots[0].jobs_completed, 3);

    processor.shutdown().await;
}

#[tokio::test]
async fn test_every_result_has_a_known_mode() {
    let workers = [echo_worker(), silent_worker(), missing_worker()];
    for worker in workers {
        let processor = ArticleProcessor::new(
            config(worker).with_exchange_timeout(Duration::from_millis(200)),
        );
        for html in ["", "<p>short</p>", ARTICLE] {
            let doc = processor.process_article(html, "https://a.example/").await;
            let tag = doc["mode"].as_str().unwrap();
            assert!(Mode::ALL.iter().any(|m| m.as_str() == tag));
        }
        processor.shutdown().await;
    }
}
