use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use theodore_common::config::TimeoutConfig;
use theodore_common::ids::TaskId;
use theodore_common::types::{EmbeddingTask, LlmResult, LlmTask, TaskContent, TaskKind};
use theodore_common::{ErrorKind, TheodoreError};

use crate::breaker::CircuitBreaker;
use crate::limiter::RateLimiter;
use crate::llm::{CompletionRequest, LlmProvider, ProviderFactory};

/// Aggregation prompts longer than this get the extended call timeout.
const LONG_PROMPT_CHARS: usize = 10_000;

/// A unit of pool work.
pub enum WorkItem {
    Completion(LlmTask),
    Embedding(EmbeddingTask),
}

impl WorkItem {
    fn task_id(&self) -> TaskId {
        match self {
            Self::Completion(task) => task.task_id,
            Self::Embedding(task) => task.task_id,
        }
    }

    fn kind(&self) -> TaskKind {
        match self {
            Self::Completion(task) => task.kind,
            Self::Embedding(_) => TaskKind::Embedding,
        }
    }

    fn deadline(&self) -> Instant {
        match self {
            Self::Completion(task) => task.deadline,
            Self::Embedding(task) => task.deadline,
        }
    }
}

struct Submission {
    item: WorkItem,
    reply: oneshot::Sender<LlmResult>,
}

/// Per-call timeout presets the workers apply.
#[derive(Clone, Debug)]
pub struct PoolTimeouts {
    pub llm_call: Duration,
    pub llm_aggregation: Duration,
}

impl From<&TimeoutConfig> for PoolTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            llm_call: Duration::from_secs(config.llm_call_secs),
            llm_aggregation: Duration::from_secs(config.llm_aggregation_secs),
        }
    }
}

/// Bounded pool of worker tasks executing provider calls.
///
/// Every call goes through the shared rate limiter first, and every worker
/// owns its own provider instance (its own HTTP session), so a hung socket
/// in one worker cannot stall the others. The pool applies per-call
/// timeouts and the task deadline; retry policy stays with the caller.
pub struct WorkerPool {
    tx: mpsc::Sender<Submission>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` worker tasks (at least one).
    pub fn start(
        workers: u32,
        timeouts: PoolTimeouts,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        factory: Arc<dyn ProviderFactory>,
    ) -> theodore_common::Result<Self> {
        let (tx, rx) = mpsc::channel::<Submission>(256);
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count as usize);

        for i in 0..count {
            let provider = factory.build()?;
            handles.push(tokio::spawn(worker_loop(
                format!("llm-worker-{}", i),
                Arc::clone(&rx),
                shutdown_rx.clone(),
                provider,
                Arc::clone(&limiter),
                Arc::clone(&breaker),
                timeouts.clone(),
            )));
        }

        tracing::info!(workers = count, "Worker pool started");

        Ok(Self {
            tx,
            shutdown_tx,
            workers: handles,
        })
    }

    /// Submit a work item and await its result. Safe to call from many
    /// tasks concurrently. A pool that is shutting down (or already gone)
    /// resolves the item as `Cancelled` rather than dropping it.
    pub async fn submit(&self, item: WorkItem) -> LlmResult {
        let task_id = item.task_id();
        let kind = item.kind();

        if *self.shutdown_tx.borrow() {
            return cancelled_result(task_id, kind, "worker pool is shutting down");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            item,
            reply: reply_tx,
        };

        if self.tx.send(submission).await.is_err() {
            return cancelled_result(task_id, kind, "worker pool is shut down");
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => cancelled_result(task_id, kind, "worker pool dropped the task"),
        }
    }

    /// Stop accepting new work. Queued and in-flight tasks still resolve;
    /// workers exit once the queue is drained.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        tracing::info!("Worker pool shutdown signaled");
    }

    /// Wait for all workers to finish. Call after `shutdown`.
    pub async fn join(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

/// Main loop for a single worker.
async fn worker_loop(
    name: String,
    rx: Arc<Mutex<mpsc::Receiver<Submission>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    provider: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    timeouts: PoolTimeouts,
) {
    tracing::debug!(worker = %name, provider = provider.name(), "Worker started");

    loop {
        let submission = {
            let mut rx = rx.lock().await;

            if *shutdown_rx.borrow() {
                // Draining: serve what is already queued, then exit.
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    _ = shutdown_rx.changed() => rx.try_recv().ok(),
                    maybe = rx.recv() => maybe,
                }
            }
        };

        let Some(submission) = submission else {
            break;
        };

        let result = execute(
            &provider,
            &limiter,
            &breaker,
            &timeouts,
            &submission.item,
        )
        .await;

        // Receiver may have given up; nothing to do about it.
        let _ = submission.reply.send(result);
    }

    tracing::debug!(worker = %name, "Worker stopped");
}

/// Run one item: circuit check, rate-limiter acquisition, provider call
/// under the per-call timeout, all bounded by the task deadline.
async fn execute(
    provider: &Arc<dyn LlmProvider>,
    limiter: &RateLimiter,
    breaker: &CircuitBreaker,
    timeouts: &PoolTimeouts,
    item: &WorkItem,
) -> LlmResult {
    let started = Instant::now();
    let task_id = item.task_id();
    let kind = item.kind();

    metrics::gauge!("pool.active").increment(1.0);
    let outcome = run_item(provider, limiter, breaker, timeouts, item).await;
    metrics::gauge!("pool.active").decrement(1.0);

    let duration = started.elapsed();
    metrics::histogram!("pool.task.duration", "kind" => kind.as_str())
        .record(duration.as_secs_f64());

    match outcome {
        Ok((content, tokens_in, tokens_out, cost)) => {
            metrics::counter!("pool.task.completed", "kind" => kind.as_str()).increment(1);
            metrics::counter!("llm.cost.microdollars")
                .increment((cost * 1_000_000.0) as u64);
            LlmResult {
                task_id,
                kind,
                content: Ok(content),
                tokens_in,
                tokens_out,
                cost,
                duration,
            }
        }
        Err(e) => {
            tracing::warn!(
                task_id = %task_id,
                kind = kind.as_str(),
                error = %e,
                "Task failed"
            );
            metrics::counter!("pool.task.failed", "kind" => kind.as_str(), "error" => e.kind.as_str())
                .increment(1);
            LlmResult {
                task_id,
                kind,
                content: Err(e),
                tokens_in: 0,
                tokens_out: 0,
                cost: 0.0,
                duration,
            }
        }
    }
}

async fn run_item(
    provider: &Arc<dyn LlmProvider>,
    limiter: &RateLimiter,
    breaker: &CircuitBreaker,
    timeouts: &PoolTimeouts,
    item: &WorkItem,
) -> Result<(TaskContent, u64, u64, f64), TheodoreError> {
    let deadline = item.deadline();

    if !breaker.allow() {
        return Err(TheodoreError::new(
            ErrorKind::ProviderFatal,
            "provider circuit open",
        ));
    }

    let wait_budget = deadline.saturating_duration_since(Instant::now());
    limiter
        .acquire(1, wait_budget)
        .await
        .map_err(|_| TheodoreError::timeout("rate limiter wait budget elapsed"))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(TheodoreError::timeout("task deadline elapsed before call"));
    }

    match item {
        WorkItem::Completion(task) => {
            let base = if task.kind == TaskKind::Aggregation
                && task.prompt.chars().count() > LONG_PROMPT_CHARS
            {
                timeouts.llm_aggregation
            } else {
                timeouts.llm_call
            };
            let call_timeout = base.min(remaining);

            let request = CompletionRequest {
                system: task.system.clone(),
                prompt: task.prompt.clone(),
                max_tokens: None,
                temperature: None,
            };

            match tokio::time::timeout(call_timeout, provider.complete(&request)).await {
                Err(_) => {
                    record_breaker(breaker, ErrorKind::Timeout);
                    Err(TheodoreError::timeout(format!(
                        "provider call exceeded {:.0}s",
                        call_timeout.as_secs_f64()
                    )))
                }
                Ok(Err(e)) => {
                    record_breaker(breaker, e.error_kind());
                    Err(e.into())
                }
                Ok(Ok(completion)) => {
                    breaker.record_success();
                    Ok((
                        TaskContent::Text(completion.text),
                        completion.tokens_in,
                        completion.tokens_out,
                        completion.cost_estimate,
                    ))
                }
            }
        }
        WorkItem::Embedding(task) => {
            let call_timeout = timeouts.llm_call.min(remaining);

            match tokio::time::timeout(call_timeout, provider.embed(&task.text)).await {
                Err(_) => {
                    record_breaker(breaker, ErrorKind::Timeout);
                    Err(TheodoreError::timeout(format!(
                        "embedding call exceeded {:.0}s",
                        call_timeout.as_secs_f64()
                    )))
                }
                Ok(Err(e)) => {
                    record_breaker(breaker, e.error_kind());
                    Err(e.into())
                }
                Ok(Ok(vector)) => {
                    breaker.record_success();
                    // Rough token estimate; embedding APIs bill by input.
                    let tokens_in = (task.text.len() / 4) as u64;
                    Ok((TaskContent::Vector(vector), tokens_in, 0, 0.0))
                }
            }
        }
    }
}

/// Only transport-class and fatal provider errors count against the
/// circuit. 429s are the rate limiter's problem, unparsable responses say
/// nothing about endpoint health, and a per-call timeout says more about
/// the prompt and its deadline than about the provider.
fn record_breaker(breaker: &CircuitBreaker, kind: ErrorKind) {
    match kind {
        ErrorKind::Transport | ErrorKind::ProviderFatal => breaker.record_failure(),
        _ => {}
    }
}

fn cancelled_result(task_id: TaskId, kind: TaskKind, message: &str) -> LlmResult {
    LlmResult {
        task_id,
        kind,
        content: Err(TheodoreError::cancelled(message)),
        tokens_in: 0,
        tokens_out: 0,
        cost: 0.0,
        duration: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, LlmError, ProviderFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use theodore_common::config::RateLimitConfig;

    struct StubProvider {
        delay: Duration,
        response: String,
        calls: Arc<AtomicUsize>,
    }

    impl LlmProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn complete<'a>(&'a self, _request: &'a CompletionRequest) -> ProviderFuture<'a, Completion> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                Ok(Completion {
                    text: self.response.clone(),
                    tokens_in: 10,
                    tokens_out: 5,
                    cost_estimate: 0.0,
                })
            })
        }

        fn embed<'a>(&'a self, _text: &'a str) -> ProviderFuture<'a, Vec<f32>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(vec![0.25; 8])
            })
        }

        fn health<'a>(&'a self) -> ProviderFuture<'a, ()> {
            Box::pin(async { Ok::<(), LlmError>(()) })
        }
    }

    struct StubFactory {
        delay: Duration,
        response: String,
        calls: Arc<AtomicUsize>,
    }

    impl ProviderFactory for StubFactory {
        fn build(&self) -> theodore_common::Result<Arc<dyn LlmProvider>> {
            Ok(Arc::new(StubProvider {
                delay: self.delay,
                response: self.response.clone(),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    fn pool_with(
        workers: u32,
        delay: Duration,
        capacity: u32,
        refill: f64,
    ) -> (WorkerPool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(StubFactory {
            delay,
            response: "ok".into(),
            calls: Arc::clone(&calls),
        });
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            capacity,
            refill_per_sec: refill,
        }));
        let breaker = Arc::new(CircuitBreaker::new("llm", 3, 60));
        let timeouts = PoolTimeouts {
            llm_call: Duration::from_secs(30),
            llm_aggregation: Duration::from_secs(60),
        };

        let pool = WorkerPool::start(workers, timeouts, limiter, breaker, factory).unwrap();
        (pool, calls)
    }

    fn completion_task(deadline_in: Duration) -> WorkItem {
        WorkItem::Completion(LlmTask::new(
            TaskKind::PageSelection,
            "pick pages".into(),
            None,
            Instant::now() + deadline_in,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_completion_text() {
        let (pool, _) = pool_with(2, Duration::from_millis(10), 10, 10.0);

        let result = pool.submit(completion_task(Duration::from_secs(30))).await;
        assert!(result.success());
        assert_eq!(result.text().unwrap(), "ok");
        assert_eq!(result.tokens_in, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_goes_through_pool() {
        let (pool, _) = pool_with(1, Duration::from_millis(10), 10, 10.0);

        let item = WorkItem::Embedding(EmbeddingTask::new(
            "Acme logistics".into(),
            Instant::now() + Duration::from_secs(30),
        ));
        let result = pool.submit(item).await;
        assert_eq!(result.kind, TaskKind::Embedding);
        assert_eq!(result.vector().unwrap().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_provider_call() {
        // Provider sleeps 60s; the task allows 1s.
        let (pool, _) = pool_with(1, Duration::from_secs(60), 10, 10.0);

        let started = tokio::time::Instant::now();
        let result = pool.submit(completion_task(Duration::from_secs(1))).await;

        assert!(!result.success());
        assert_eq!(result.content.unwrap_err().kind, ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_timeout_within_wait_budget() {
        // One token, near-zero refill: the second task cannot acquire.
        let (pool, calls) = pool_with(2, Duration::from_millis(10), 1, 0.001);

        let first = pool.submit(completion_task(Duration::from_secs(2))).await;
        assert!(first.success());

        let second = pool.submit(completion_task(Duration::from_secs(2))).await;
        assert_eq!(second.content.unwrap_err().kind, ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_resolves_every_submission() {
        let (pool, _) = pool_with(2, Duration::from_millis(200), 10, 10.0);
        let pool = Arc::new(pool);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.submit(completion_task(Duration::from_secs(30))).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();

        // Every submission resolves: completed or cancelled, never dropped.
        let mut resolved = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            match &result.content {
                Ok(_) => resolved += 1,
                Err(e) => {
                    assert_eq!(e.kind, ErrorKind::Cancelled);
                    resolved += 1;
                }
            }
        }
        assert_eq!(resolved, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_shutdown_is_cancelled() {
        let (pool, calls) = pool_with(1, Duration::from_millis(10), 10, 10.0);
        pool.shutdown();

        let result = pool.submit(completion_task(Duration::from_secs(5))).await;
        assert_eq!(result.content.unwrap_err().kind, ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
