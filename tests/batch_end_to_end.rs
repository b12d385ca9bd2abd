use gleaner::batch::{BatchOrchestrator, CsvSink, InputTable};
use gleaner::config::Config;
use gleaner::wall::text::TEMPLATE_EN;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn config() -> Config {
    Config {
        concurrency: 2,
        domain_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        max_attempts: 1,
        backoff_base: Duration::from_millis(1),
        min_words: 50,
        checkpoint_every: 1,
        ..Config::default()
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("Content-Type", "text/html; charset=utf-8")
}

fn consent_page() -> String {
    let paragraphs: String = TEMPLATE_EN
        .lines()
        .map(|line| format!("<p>{line}</p>"))
        .collect();
    format!("<html><head><title>Yahoo</title></head><body><div class=\"consent\">{paragraphs}</div></body></html>")
}

fn article_page() -> String {
    format!(
        "<html><head><title>Refinery restart</title></head><body><article><h1>Refinery restart</h1><p>{}</p><p>{}</p></article></body></html>",
        "The refinery restarted two crude units on Tuesday after a brief outage lifted regional fuel prices. ".repeat(6),
        "Analysts expect margins to normalise once inventories rebuild over the coming weeks. ".repeat(6),
    )
}

async fn mount_publisher(server: &MockServer) -> String {
    Mock::given(method("GET"))
        .and(path("/consent"))
        .respond_with(html(consent_page()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/go"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/hop"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hop"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", "/landing?utm_source=api"),
        )
        .mount(server)
        .await;

    let canonical = format!("{}/markets/refinery-restart", server.uri());
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(html(format!(
            r#"<html><head><link rel="canonical" href="{canonical}"></head><body><p>Loading</p></body></html>"#
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markets/refinery-restart"))
        .respond_with(html(article_page()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    canonical
}

#[tokio::test]
async fn test_three_row_batch() {
    let server = MockServer::start().await;
    let canonical = mount_publisher(&server).await;

    let csv = format!(
        "id,headline,url\nwall,Consent,{uri}/consent\nstory,Refinery,{uri}/go\ngone,Missing,{uri}/missing\n",
        uri = server.uri()
    );
    let table = InputTable::parse(&csv).unwrap();
    let items = table.work_items(Some("id")).unwrap();
    let keys = table.row_keys(Some("id")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("articles.csv");
    let sink = CsvSink::new(&output, &table, keys);

    let orchestrator = BatchOrchestrator::from_config(&config(), None).unwrap();
    let run = orchestrator
        .run(items, HashMap::new(), &sink, CancellationToken::new())
        .await
        .unwrap();

    let wall = &run.outcomes["wall"];
    assert_eq!(
        wall.error.as_deref(),
        Some("content_rejected:cookie_wall_or_too_short")
    );
    assert_eq!(wall.extractor, None);
    assert_eq!(wall.http_status, Some(200));
    assert!(wall.final_url.as_deref().unwrap().ends_with("/consent"));

    let story = &run.outcomes["story"];
    assert_eq!(story.final_url.as_deref(), Some(canonical.as_str()));
    assert!(story.extractor.is_some());
    assert!(story.error.is_none());
    assert!(story.word_count >= 50);
    assert!(story.article_text.as_deref().unwrap().contains("refinery restarted"));

    let gone = &run.outcomes["gone"];
    assert_eq!(gone.error.as_deref(), Some("network_permanent:http_404"));
    assert_eq!(gone.article_text, None);
    assert_eq!(gone.extractor, None);

    assert_eq!(run.report.total, 3);
    assert_eq!(run.report.accepted, 1);
    assert_eq!(run.report.exhausted, 2);
    assert_eq!(run.report.checkpoints, 4);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "id");
    assert_eq!(&headers[3], "final_url");
    let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(&records[1][0], "story");
    assert_eq!(&records[1][3], canonical);
    assert_eq!(&records[2][7], "network_permanent:http_404");
}

#[tokio::test]
async fn test_resume_skips_accepted_rows() {
    let server = MockServer::start().await;
    let canonical = mount_publisher(&server).await;

    let csv = format!(
        "id,url\nstory,{uri}/go\ngone,{uri}/missing\n",
        uri = server.uri()
    );
    let table = InputTable::parse(&csv).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("articles.csv");

    let first = CsvSink::new(&output, &table, table.row_keys(Some("id")).unwrap());
    BatchOrchestrator::from_config(&config(), None)
        .unwrap()
        .run(
            table.work_items(Some("id")).unwrap(),
            HashMap::new(),
            &first,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let previous = CsvSink::load_accepted(&output, Some("id")).unwrap();
    assert_eq!(previous.len(), 1);
    assert_eq!(previous["story"].final_url.as_deref(), Some(canonical.as_str()));

    let second = CsvSink::new(&output, &table, table.row_keys(Some("id")).unwrap());
    let run = BatchOrchestrator::from_config(&config(), None)
        .unwrap()
        .run(
            table.work_items(Some("id")).unwrap(),
            previous.clone(),
            &second,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(run.report.skipped_resumed, 1);
    assert_eq!(run.outcomes["story"], previous["story"]);
    assert_eq!(
        run.outcomes["gone"].error.as_deref(),
        Some("network_permanent:http_404")
    );
}
