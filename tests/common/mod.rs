//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires an in-memory DB, an [`Orchestrator`]
//! backed by scripted mock collaborators, and the full [`AppContext`]. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_core::{OwnerId, ResultRef, RunId, RunParams, RunStatus, SceneSpec};
use rf_db::{get_conn, init_memory_pool, DbPool, PooledConnection};
use rf_engine::{
    ActivityError, InferenceClient, InferenceRequest, MediaTransform, Orchestrator, PollOutcome,
    RemoteJobId, RunSubmission, SpeechClient, WebhookNotifier,
};
use rf_server::context::AppContext;
use rf_server::router::build_router;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Scripted inference backend.
///
/// Completed generations resolve to `img:{prompt}` for image requests and
/// `vid:{prompt}` for video requests.
#[derive(Default)]
pub struct MockInference {
    submits: AtomicU32,
    /// Prompts whose submission fails fatally.
    reject_prompts: Mutex<HashSet<String>>,
    /// Prompts whose generations never finish.
    stall_prompts: Mutex<HashSet<String>>,
    /// Remaining retryable submit failures, per prompt.
    flaky_prompts: Mutex<HashMap<String, u32>>,
    jobs: Mutex<HashMap<String, PollOutcome>>,
}

impl MockInference {
    pub fn reject(&self, prompt: &str) {
        self.reject_prompts.lock().insert(prompt.to_string());
    }

    pub fn stall(&self, prompt: &str) {
        self.stall_prompts.lock().insert(prompt.to_string());
    }

    /// Fail the next `n` submissions of this prompt retryably.
    pub fn flake(&self, prompt: &str, n: u32) {
        self.flaky_prompts.lock().insert(prompt.to_string(), n);
    }

    pub fn submit_count(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn submit(&self, request: &InferenceRequest) -> Result<RemoteJobId, ActivityError> {
        self.submits.fetch_add(1, Ordering::SeqCst);

        if self.reject_prompts.lock().contains(&request.prompt) {
            return Err(ActivityError::fatal(format!(
                "backend rejected prompt: {}",
                request.prompt
            )));
        }
        if let Some(remaining) = self.flaky_prompts.lock().get_mut(&request.prompt) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ActivityError::retryable("backend overloaded"));
            }
        }

        let id = format!("job-{}", self.submits.load(Ordering::SeqCst));
        let outcome = if self.stall_prompts.lock().contains(&request.prompt) {
            PollOutcome::Pending
        } else {
            let kind = if request.source_image.is_some() { "vid" } else { "img" };
            PollOutcome::Done(ResultRef::new(format!("{kind}:{}", request.prompt)))
        };
        self.jobs.lock().insert(id.clone(), outcome);
        Ok(RemoteJobId::new(id))
    }

    async fn poll(&self, job: &RemoteJobId) -> Result<PollOutcome, ActivityError> {
        // Stalled generations stay pending; yield so the poll loop does not
        // starve other tasks under a zero poll interval.
        tokio::task::yield_now().await;
        self.jobs
            .lock()
            .get(job.as_str())
            .cloned()
            .ok_or_else(|| ActivityError::retryable(format!("unknown job {job}")))
    }
}

/// Scripted voiceover backend that counts synthesis calls.
#[derive(Default)]
pub struct MockSpeech {
    calls: AtomicU32,
    fail_next: AtomicU32,
}

impl MockSpeech {
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` synthesis calls retryably.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechClient for MockSpeech {
    async fn synthesize(&self, _script: &str) -> Result<ResultRef, ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ActivityError::retryable("synthesis backend unavailable"));
        }
        Ok(ResultRef::new("audio/voiceover.wav"))
    }
}

/// Media transform that records its inputs instead of running ffmpeg.
#[derive(Default)]
pub struct RecordingTransform {
    stitched: Mutex<Vec<(Vec<ResultRef>, ResultRef)>>,
    burned: Mutex<Vec<ResultRef>>,
}

impl RecordingTransform {
    /// Clip lists passed to `stitch`, in call order.
    pub fn stitch_calls(&self) -> Vec<(Vec<ResultRef>, ResultRef)> {
        self.stitched.lock().clone()
    }

    pub fn burn_count(&self) -> usize {
        self.burned.lock().len()
    }
}

#[async_trait]
impl MediaTransform for RecordingTransform {
    async fn stitch(
        &self,
        clips: &[ResultRef],
        voiceover: &ResultRef,
    ) -> Result<ResultRef, ActivityError> {
        self.stitched
            .lock()
            .push((clips.to_vec(), voiceover.clone()));
        Ok(ResultRef::new("media/merged.mp4"))
    }

    async fn burn_subtitles(
        &self,
        merged: &ResultRef,
        _script: &str,
        _language: &str,
    ) -> Result<ResultRef, ActivityError> {
        self.burned.lock().push(merged.clone());
        Ok(ResultRef::new("media/final.mp4"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub db: DbPool,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub inference: Arc<MockInference>,
    pub speech: Arc<MockSpeech>,
    pub transform: Arc<RecordingTransform>,
    pub config: Config,
    pub shutdown: CancellationToken,
}

impl TestHarness {
    /// Create a new harness with fast test configuration and in-memory DB.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: Config) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let bus = Arc::new(EventBus::default());
        let inference = Arc::new(MockInference::default());
        let speech = Arc::new(MockSpeech::default());
        let transform = Arc::new(RecordingTransform::default());
        let webhook = Arc::new(WebhookNotifier::new(
            config.webhook.url.clone(),
            config.webhook.timeout_secs,
        ));
        let shutdown = CancellationToken::new();

        let orchestrator = Orchestrator::new(
            db.clone(),
            bus.clone(),
            &config,
            inference.clone(),
            speech.clone(),
            transform.clone(),
            webhook,
            shutdown.clone(),
        );

        Self {
            db,
            bus,
            orchestrator,
            inference,
            speech,
            transform,
            config,
            shutdown,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let ctx = AppContext {
            db: harness.db.clone(),
            config: Arc::new(harness.config.clone()),
            event_bus: harness.bus.clone(),
            orchestrator: harness.orchestrator.clone(),
        };
        let app = build_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }

    pub fn submit(&self, run_id: &str, owner_id: &str, scenes: usize) -> rf_core::Result<u32> {
        self.orchestrator.start_run(submission(run_id, owner_id, scenes))
    }

    /// Poll the query index until the run reaches a terminal status.
    pub async fn wait_terminal(&self, run_id: &str) -> RunStatus {
        let run_id = RunId::new(run_id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            {
                let conn = self.conn();
                if let Some(row) = rf_db::queries::runs::get_run(&conn, &run_id).unwrap() {
                    if row.status.is_terminal() {
                        return row.status;
                    }
                }
            }
            if tokio::time::Instant::now() > deadline {
                panic!("run {run_id} did not reach a terminal status in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the owner holds no slots. Terminal log appends land just
    /// before the slot release, so tests that resubmit must wait for this.
    pub async fn wait_slots_free(&self, owner_id: &str) {
        let owner = OwnerId::new(owner_id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            {
                let conn = self.conn();
                if rf_db::queries::slots::count_for_owner(&conn, &owner).unwrap() == 0 {
                    return;
                }
            }
            if tokio::time::Instant::now() > deadline {
                panic!("slots for {owner_id} were not released in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Test configuration: no poll delay, no backoff delay, two attempts.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.inference.poll_interval_secs = 0;
    config.inference.backoff_base_secs = 0;
    config.inference.backoff_cap_secs = 0;
    config.inference.max_attempts = 2;
    config
}

/// A valid submission with `scenes` scenes, prompts `image {i}` / `video {i}`.
pub fn submission(run_id: &str, owner_id: &str, scenes: usize) -> RunSubmission {
    RunSubmission {
        run_id: RunId::new(run_id),
        owner_id: OwnerId::new(owner_id),
        scenes: (0..scenes)
            .map(|i| SceneSpec {
                image_prompt: format!("image {i}"),
                video_prompt: format!("video {i}"),
            })
            .collect(),
        params: RunParams {
            script: "a narrated test script".into(),
            ..RunParams::default()
        },
    }
}
