// Test mocks for the PromoTrack pipeline.
//
// One mock per trait boundary:
// - MockDirectFetcher (DirectFetcher): URL→body, with robots-blocked URLs
// - MockRenderService (RenderService): URL→scripted sequence of responses
// - MockPromotionModel (PromotionModel): queued raw replies, then a default
// - RecordingNotifier (ReviewNotifier): keeps every request
// - FailingRegistry (TargetRegistry): always unavailable
//
// Plus builders for targets, verdicts and pages, and a TestPipeline harness
// wiring everything to in-memory stores.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use promotrack_common::{
    CapabilityHint, ContentFormat, DetectionTier, ExtractionRules, Target, TargetId, Verdict,
};
use promotrack_store::{MemoryBlobStore, MemoryStore, StoreError, TargetRegistry};

use crate::acquirer::{Acquirer, DirectFetcher, FetchError, RenderError, RenderService, RenderedPage};
use crate::classifier::{Classifier, ModelError, ModelRequest, PromotionModel};
use crate::notify::{ReviewNotifier, ReviewRequest};
use crate::orchestrator::{Orchestrator, PipelineDeps, RunSettings};
use crate::retry::RetryPolicy;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn bump(counts: &Mutex<HashMap<String, u32>>, url: &str) {
    *lock(counts).entry(url.to_string()).or_insert(0) += 1;
}

// ---------------------------------------------------------------------------
// MockDirectFetcher
// ---------------------------------------------------------------------------

/// URL-keyed direct fetcher. Unregistered URLs answer 404.
#[derive(Default)]
pub struct MockDirectFetcher {
    responses: HashMap<String, Result<String, FetchError>>,
    robots_blocked: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDirectFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.responses.insert(url.to_string(), Ok(body.into()));
        self
    }

    pub fn on_error(mut self, url: &str, error: FetchError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    /// robots.txt disallows this URL.
    pub fn robots_block(mut self, url: &str) -> Self {
        self.robots_blocked.insert(url.to_string());
        self
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> u32 {
        lock(&self.calls).get(url).copied().unwrap_or(0)
    }

    /// Highest number of fetches observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectFetcher for MockDirectFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        bump(&self.calls, url);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }

    async fn robots_allows(&self, url: &str) -> bool {
        !self.robots_blocked.contains(url)
    }

    fn name(&self) -> &str {
        "mock-direct"
    }
}

// ---------------------------------------------------------------------------
// MockRenderService
// ---------------------------------------------------------------------------

/// Scripted rendering service. Each URL replays its responses in order and
/// repeats the last one once the script runs out. Unregistered URLs fail
/// permanently.
#[derive(Default)]
pub struct MockRenderService {
    scripts: Mutex<HashMap<String, VecDeque<Result<RenderedPage, RenderError>>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockRenderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_html(self, url: &str, html: impl Into<String>) -> Self {
        self.on_response(url, Ok(rendered(html, ContentFormat::Html)))
    }

    pub fn on_markdown(self, url: &str, markdown: impl Into<String>) -> Self {
        self.on_response(url, Ok(rendered(markdown, ContentFormat::Markdown)))
    }

    pub fn on_error(self, url: &str, error: RenderError) -> Self {
        self.on_response(url, Err(error))
    }

    /// Append a response to `url`'s script.
    pub fn on_response(self, url: &str, response: Result<RenderedPage, RenderError>) -> Self {
        lock(&self.scripts)
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self, url: &str) -> u32 {
        lock(&self.calls).get(url).copied().unwrap_or(0)
    }
}

fn rendered(content: impl Into<String>, format: ContentFormat) -> RenderedPage {
    RenderedPage {
        content: content.into(),
        format,
        metadata: serde_json::Value::Null,
        cost_units: 1,
    }
}

#[async_trait]
impl RenderService for MockRenderService {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        bump(&self.calls, url);
        let mut scripts = lock(&self.scripts);
        let Some(script) = scripts.get_mut(url) else {
            return Err(RenderError::permanent(format!(
                "MockRenderService: nothing registered for {url}"
            )));
        };
        if script.len() > 1 {
            script
                .pop_front()
                .unwrap_or_else(|| Err(RenderError::permanent("empty script")))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(RenderError::permanent("empty script")))
        }
    }

    fn name(&self) -> &str {
        "mock-render"
    }
}

// ---------------------------------------------------------------------------
// MockPromotionModel
// ---------------------------------------------------------------------------

/// Returns queued replies first, then the default reply forever.
pub struct MockPromotionModel {
    queued: Mutex<VecDeque<Result<String, ModelError>>>,
    default: Result<String, ModelError>,
    calls: AtomicU32,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockPromotionModel {
    pub fn replying(raw: impl Into<String>) -> Self {
        Self::with_default(Ok(raw.into()))
    }

    pub fn failing(error: ModelError) -> Self {
        Self::with_default(Err(error))
    }

    /// Reports no promotion with high confidence.
    pub fn no_promotion() -> Self {
        Self::replying(verdict_json(false, None, 0.9, "none"))
    }

    fn with_default(default: Result<String, ModelError>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<String, ModelError>) -> Self {
        lock(&self.queued).push_back(reply);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl PromotionModel for MockPromotionModel {
    async fn classify(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        let queued = lock(&self.queued).pop_front();
        queued.unwrap_or_else(|| self.default.clone())
    }

    fn name(&self) -> &str {
        "mock-model"
    }
}

/// Raw JSON in the shape the model is asked to produce.
pub fn verdict_json(
    has_promotion: bool,
    promotion_text: Option<&str>,
    confidence: f64,
    category: &str,
) -> String {
    serde_json::json!({
        "has_promotion": has_promotion,
        "promotion_text": promotion_text,
        "confidence": confidence,
        "category": category,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Notifier and registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    requests: Mutex<Vec<ReviewRequest>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ReviewRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ReviewNotifier for RecordingNotifier {
    async fn request_review(&self, request: &ReviewRequest) -> anyhow::Result<()> {
        lock(&self.requests).push(request.clone());
        Ok(())
    }
}

/// Registry whose backing store is down.
pub struct FailingRegistry;

#[async_trait]
impl TargetRegistry for FailingRegistry {
    async fn list_enabled(&self) -> promotrack_store::Result<Vec<Target>> {
        Err(StoreError::NotFound("registry unavailable".to_string()))
    }

    async fn update_hint(
        &self,
        target_id: &TargetId,
        _hint: &CapabilityHint,
    ) -> promotrack_store::Result<()> {
        Err(StoreError::NotFound(target_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn url_for(id: &str) -> String {
    format!("https://{id}.example.com/")
}

pub fn target(id: &str) -> Target {
    let mut target = Target::new(id, url_for(id));
    target.name = Some(format!("{id} store"));
    target
}

pub fn target_with_hint(id: &str, selectors: &[&str]) -> Target {
    let mut target = target(id);
    target.capability_hint = Some(CapabilityHint {
        rules: ExtractionRules {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        },
        learned_at: Utc::now(),
    });
    target
}

pub fn verdict(target_id: &str, date: NaiveDate, has_promotion: bool) -> Verdict {
    Verdict {
        target_id: TargetId::from(target_id),
        observation_date: date,
        has_promotion,
        promotion_text: has_promotion.then(|| "Sale on now".to_string()),
        confidence: 0.9,
        detection_tier: DetectionTier::ModelBased,
        category: None,
        content_ref: None,
        observed_at: Utc::now(),
    }
}

/// A page with a promotional banner inside `<p class="deal">`.
pub fn promo_page(banner: &str) -> String {
    format!(
        "<html><head><title>Shop</title></head><body>\
         <nav><a href=\"/\">Home</a><a href=\"/new\">New arrivals</a></nav>\
         <main><section><p class=\"deal\">{banner}</p></section>\
         <article><h2>Autumn collection</h2><p>Knitwear, coats and boots for colder days.</p></article>\
         </main></body></html>"
    )
}

pub fn plain_page() -> String {
    "<html><head><title>Shop</title></head><body>\
     <main><article><h2>Autumn collection</h2><p>Knitwear, coats and boots for colder days.</p></article>\
     </main></body></html>"
        .to_string()
}

/// Settings with millisecond backoff and no run log on disk.
pub fn test_settings() -> RunSettings {
    RunSettings {
        concurrency: 4,
        run_timeout: Duration::from_secs(60),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        },
        forecast_on_unresolved: false,
        retention_days: 90,
        run_log_dir: None,
    }
}

// ---------------------------------------------------------------------------
// TestPipeline
// ---------------------------------------------------------------------------

/// Mocks and in-memory stores, kept around so tests can inspect them after a run.
pub struct TestPipeline {
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub direct: Arc<MockDirectFetcher>,
    pub render: Arc<MockRenderService>,
    pub model: Arc<MockPromotionModel>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestPipeline {
    pub fn new(
        direct: MockDirectFetcher,
        render: MockRenderService,
        model: MockPromotionModel,
    ) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            direct: Arc::new(direct),
            render: Arc::new(render),
            model: Arc::new(model),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn orchestrator(&self, settings: RunSettings) -> Orchestrator {
        let acquirer = Acquirer::new(self.direct.clone(), self.render.clone())
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let classifier = Classifier::new(self.model.clone()).with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        });
        Orchestrator::new(
            PipelineDeps {
                registry: self.store.clone(),
                records: self.store.clone(),
                blobs: self.blobs.clone(),
                acquirer,
                classifier,
                notifier: self.notifier.clone(),
            },
            settings,
        )
    }
}
