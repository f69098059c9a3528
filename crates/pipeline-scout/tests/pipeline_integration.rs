//! End-to-end pipeline tests.
//!
//! HTTP (pages and the extraction API) is served by wiremock and the
//! browser is a scripted in-process renderer, so nothing leaves the host:
//! - cascade escalation and the rendered-content floor
//! - discovery fallback and deduplication
//! - a full Target run with a file-backed ledger and sink
//! - ledger durability across governor restarts

use async_trait::async_trait;
use pipeline_scout::acquisition::{
    AcquisitionCascade, AcquisitionError, AcquisitionErrorKind, AcquisitionMethod,
    AcquisitionResult, Acquirer, HttpClient,
};
use pipeline_scout::config::{DiscoverySettings, ExtractionSettings, FetchSettings, RunSettings};
use pipeline_scout::discovery::{
    CandidateOrigin, DiscoveryEngine, RawAnchor, SearchEngine, SearchProvider,
};
use pipeline_scout::extraction::OpenAiExtractor;
use pipeline_scout::orchestrator::{Orchestrator, TargetStatus};
use pipeline_scout::quota::{
    Clock, CostModel, JsonFileStore, ManualClock, QuotaGovernor, QuotaLimits,
};
use pipeline_scout::renderer::{NavigationResult, RenderContext, Renderer};
use pipeline_scout::sink::JsonlSink;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fakes ──

/// Renderer whose every page has the same body text.
struct FixedPageRenderer {
    body: String,
    opened: AtomicUsize,
}

impl FixedPageRenderer {
    fn new(body: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            body: body.into(),
            opened: AtomicUsize::new(0),
        })
    }
}

struct FixedPage {
    body: String,
}

#[async_trait]
impl Renderer for FixedPageRenderer {
    async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixedPage {
            body: self.body.clone(),
        }))
    }
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

#[async_trait]
impl RenderContext for FixedPage {
    async fn navigate(&mut self, url: &str, _: u64) -> anyhow::Result<NavigationResult> {
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }
    async fn execute_js(&self, script: &str) -> anyhow::Result<serde_json::Value> {
        if script.starts_with("!!") {
            return Ok(json!(false));
        }
        Ok(json!(json!({ "body": self.body }).to_string()))
    }
    async fn type_text(&self, _: &str, _: &str, _: u64) -> anyhow::Result<()> {
        Ok(())
    }
    async fn press_key(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Search surface that returns a fixed anchor list.
struct StaticSearch(Vec<RawAnchor>);

#[async_trait]
impl SearchProvider for StaticSearch {
    fn engine(&self) -> SearchEngine {
        SearchEngine::DuckDuckGo
    }
    async fn search(&self, _: &str) -> anyhow::Result<Vec<RawAnchor>> {
        Ok(self.0.clone())
    }
}

/// Sends requests for one origin to a local server instead.
struct RedirectingAcquirer {
    inner: AcquisitionCascade,
    from: String,
    to: String,
}

#[async_trait]
impl Acquirer for RedirectingAcquirer {
    async fn acquire(&self, url: &str) -> Result<AcquisitionResult, AcquisitionError> {
        let local = url.replacen(&self.from, &self.to, 1);
        let mut result = self.inner.acquire(&local).await?;
        result.url = url.to_string();
        Ok(result)
    }
}

fn fast_fetch() -> FetchSettings {
    FetchSettings {
        http_timeout_ms: 2_000,
        settle_ms: 0,
        selector_timeout_ms: 0,
        ..FetchSettings::default()
    }
}

fn cascade(renderer: Arc<dyn Renderer>) -> AcquisitionCascade {
    let settings = fast_fetch();
    AcquisitionCascade::new(HttpClient::new(&settings).unwrap(), renderer, settings)
}

async fn page_server(route: &str, body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    server
}

fn article(chars: usize) -> String {
    format!(
        "<html><head><script>var tracking = 1;</script></head><body>\
         <nav>Menu</nav><main><p>{}</p></main><footer>Legal</footer></body></html>",
        "p".repeat(chars)
    )
}

// ── Cascade ──

#[tokio::test]
async fn test_escalation_threshold_is_exact() {
    let thin = page_server("/thin", article(1_999)).await;
    let renderer = FixedPageRenderer::new("r".repeat(500));
    let result = cascade(renderer.clone())
        .acquire(&format!("{}/thin", thin.uri()))
        .await
        .unwrap();
    assert_eq!(result.method, AcquisitionMethod::Rendered);
    assert_eq!(renderer.opened.load(Ordering::SeqCst), 1);

    let full = page_server("/full", article(2_000)).await;
    let renderer = FixedPageRenderer::new("r".repeat(500));
    let result = cascade(renderer.clone())
        .acquire(&format!("{}/full", full.uri()))
        .await
        .unwrap();
    assert_eq!(result.method, AcquisitionMethod::Lightweight);
    assert_eq!(result.length, 2_000);
    assert_eq!(renderer.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rendered_floor_is_exact() {
    let server = page_server("/spa", "<div id=\"app\"></div>".into()).await;
    let url = format!("{}/spa", server.uri());

    let err = cascade(FixedPageRenderer::new("z".repeat(99)))
        .acquire(&url)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AcquisitionErrorKind::TooShort);
    assert_eq!(err.tier, AcquisitionMethod::Rendered);

    let ok = cascade(FixedPageRenderer::new("z".repeat(100)))
        .acquire(&url)
        .await
        .unwrap();
    assert_eq!(ok.length, 100);
}

#[tokio::test]
async fn test_tier1_failure_kinds() {
    let server = MockServer::start().await;
    let routes = [
        ("/forbidden", 403),
        ("/missing", 404),
        ("/busy", 429),
        ("/broken", 500),
    ];
    for (route, status) in routes {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    let client = HttpClient::new(&fast_fetch()).unwrap();

    let expected = [
        ("/forbidden", AcquisitionErrorKind::HttpForbidden),
        ("/missing", AcquisitionErrorKind::HttpNotFound),
        ("/busy", AcquisitionErrorKind::HttpRateLimited),
        ("/broken", AcquisitionErrorKind::HttpServerError),
    ];
    for (route, kind) in expected {
        let err = client
            .get(&format!("{}{route}", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, kind, "{route}");
        assert_eq!(err.tier, AcquisitionMethod::Lightweight);
    }

    // Nothing listens on port 1.
    let err = client.get("http://127.0.0.1:1/").await.unwrap_err();
    assert_eq!(err.kind, AcquisitionErrorKind::ConnectionRefused);
}

// ── Discovery ──

#[tokio::test]
async fn test_discovery_merges_search_and_fallback_without_duplicates() {
    let engine = DiscoveryEngine::new(
        Box::new(StaticSearch(vec![
            RawAnchor::new(
                "/l/?uddg=https%3A%2F%2Fwww.pfizer.com%2Fscience%2Fpipeline",
                "Pfizer pipeline",
            ),
            RawAnchor::new("https://www.linkedin.com/company/pfizer", "Pfizer"),
        ])),
        DiscoverySettings::default(),
    );

    let found = engine.discover("Pfizer").await;
    let urls: Vec<&str> = found.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://www.pfizer.com/science/pipeline",
            "https://www.pfizer.com/pipeline",
        ]
    );
    assert_eq!(found[0].origin, CandidateOrigin::Search);
    assert_eq!(found[1].origin, CandidateOrigin::Generated);
    assert!(found.len() <= 8);
}

// ── Full Target ──

#[tokio::test]
async fn test_pfizer_run_uses_generated_urls_end_to_end() {
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("quota-ledger.json");
    let sink_path = dir.path().join("products.jsonl");

    // /pipeline is a thin SPA shell; /science/pipeline is a full page.
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/science/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article(3_000)))
        .mount(&site)
        .await;

    let api = MockServer::start().await;
    let content = json!({
        "products": [
            { "name": "Vepdegestrant", "category": "Oncology", "stage": "3" },
            { "name": "Danuglipron", "category": "Metabolic", "stage": "2" }
        ]
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": content } }],
            "usage": { "prompt_tokens": 4000, "completion_tokens": 500 }
        })))
        .expect(1)
        .mount(&api)
        .await;

    // The browser tier is unavailable, so the 404 page fails outright.
    let acquirer = RedirectingAcquirer {
        inner: cascade(Arc::new(pipeline_scout::renderer::NoopRenderer)),
        from: "https://www.pfizer.com".into(),
        to: site.uri(),
    };
    let extractor = OpenAiExtractor::new(ExtractionSettings {
        api_base: format!("{}/v1", api.uri()),
        api_key: Some("sk-test".into()),
        ..ExtractionSettings::default()
    })
    .unwrap();
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let governor = QuotaGovernor::open(
        QuotaLimits::default(),
        CostModel::default(),
        Box::new(JsonFileStore::new(&ledger_path)),
        clock,
    );

    let mut orch = Orchestrator::new(
        DiscoveryEngine::new(Box::new(StaticSearch(Vec::new())), DiscoverySettings::default()),
        Box::new(acquirer),
        Box::new(extractor),
        governor,
        RunSettings::default(),
    )
    .with_sink(Box::new(JsonlSink::open(&sink_path).unwrap()));

    let run = orch.run("Pfizer", 5).await.unwrap();

    let candidates: Vec<&str> = run.candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        candidates,
        vec![
            "https://www.pfizer.com/pipeline",
            "https://www.pfizer.com/science/pipeline",
        ]
    );
    assert_eq!(run.attempted, 2);
    assert_eq!(run.succeeded, 1);
    assert_eq!(run.status(), TargetStatus::Success);
    assert_eq!(run.results[0].source_url, "https://www.pfizer.com/science/pipeline");
    assert_eq!(run.results[0].method, AcquisitionMethod::Lightweight);

    let ledger: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&ledger_path).unwrap()).unwrap();
    assert_eq!(ledger["daily"]["request_count"], 1);

    let sink = std::fs::read_to_string(&sink_path).unwrap();
    let records: Vec<serde_json::Value> = sink
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["moleculeName"], "Vepdegestrant");
    assert_eq!(records[0]["companyName"], "Pfizer");
}

// ── Ledger durability ──

#[tokio::test]
async fn test_ledger_survives_restart_with_fresh_session() {
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("quota-ledger.json");
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let limits = QuotaLimits {
        requests_per_minute: 3,
        ..QuotaLimits::default()
    };

    {
        let mut governor = QuotaGovernor::open(
            limits,
            CostModel::default(),
            Box::new(JsonFileStore::new(&ledger_path)),
            clock.clone(),
        );
        for _ in 0..3 {
            assert!(governor.check().allowed);
            governor.record(1_000, 200).unwrap();
        }
    }

    clock.advance(std::time::Duration::from_secs(5));
    let mut reopened = QuotaGovernor::open(
        limits,
        CostModel::default(),
        Box::new(JsonFileStore::new(&ledger_path)),
        clock.clone(),
    );
    let stats = reopened.stats();
    assert_eq!(stats.daily.requests, 3);
    assert_eq!(stats.session.requests, 0);

    // The restored minute window still blocks a burst after restart.
    let decision = reopened.check();
    assert!(!decision.allowed);
    assert_eq!(decision.wait_seconds, Some(55));

    let decision = reopened.await_capacity().await;
    assert!(decision.allowed);
    assert!(clock.now() > chrono::Utc::now());
}
