//! Run orchestration: pagination walks feed a shared task queue consumed
//! by a fixed pool of fetch workers.
//!
//! Workers fetch detail pages, extract and normalize them, and push
//! records through the sink. The walk and the workers run concurrently;
//! shutdown always drains in-flight work rather than aborting it. Only a
//! proxy-pool outage aborts the run early.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::clean::normalize;
use crate::dedup::DedupStore;
use crate::error::ScrapeError;
use crate::extract::listing::extract_listing;
use crate::extract::search::is_detail_url;
use crate::models::{CrawlTask, ListingRecord, SkippedPage};
use crate::scrape::{Fetcher, PageState, PaginationDriver};

/// Receives normalized records as workers produce them.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: ListingRecord);
}

/// Sink that buffers records in memory, for export after the run.
#[derive(Default)]
pub struct RecordCollector {
    records: Mutex<Vec<ListingRecord>>,
}

impl RecordCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("collector lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take_records(&self) -> Vec<ListingRecord> {
        std::mem::take(&mut *self.records.lock().expect("collector lock poisoned"))
    }
}

impl RecordSink for RecordCollector {
    fn emit(&self, record: ListingRecord) {
        self.records
            .lock()
            .expect("collector lock poisoned")
            .push(record);
    }
}

/// In-process task queue shared between the walk and the workers.
///
/// `pop` suspends until a task arrives or the queue closes; once closed
/// and empty it returns `None` and workers exit.
struct TaskQueue {
    tasks: Mutex<VecDeque<CrawlTask>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, task: CrawlTask) {
        self.tasks
            .lock()
            .expect("task queue lock poisoned")
            .push_back(task);
        self.notify.notify_waiters();
    }

    /// No more tasks will arrive; remaining ones are still served.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Drop pending tasks and close. Used on fatal errors.
    fn shutdown(&self) {
        self.tasks.lock().expect("task queue lock poisoned").clear();
        self.close();
    }

    async fn pop(&self) -> Option<CrawlTask> {
        loop {
            let notified = self.notify.notified();
            {
                let mut tasks = self.tasks.lock().expect("task queue lock poisoned");
                if let Some(task) = tasks.pop_front() {
                    return Some(task);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                // close raced with a final push
                let mut tasks = self.tasks.lock().expect("task queue lock poisoned");
                return tasks.pop_front();
            }
            notified.await;
        }
    }
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct PipelineStats {
    /// Unique records emitted through the sink.
    pub records: usize,
    /// Records dropped because their listing id was already seen.
    pub duplicates: usize,
    /// Discovery pages fetched across all walks.
    pub pages_fetched: usize,
    /// Pages abandoned with their reasons.
    pub skips: Vec<SkippedPage>,
    /// Where the last walk ended.
    pub final_state: PageState,
}

struct RunCtx {
    fetcher: Arc<Fetcher>,
    queue: TaskQueue,
    dedup: DedupStore,
    sink: Arc<dyn RecordSink>,
    records: AtomicUsize,
    duplicates: AtomicUsize,
    skips: Mutex<Vec<SkippedPage>>,
    fatal: Mutex<Option<ScrapeError>>,
    stop: watch::Sender<bool>,
}

impl RunCtx {
    fn record_skip(&self, url: &str, err: &ScrapeError) {
        warn!(url, reason = %err, "page skipped");
        self.skips.lock().expect("skip list lock poisoned").push(SkippedPage {
            url: url.to_string(),
            reason: err.skip_reason(),
        });
    }

    /// One worker: claim detail tasks until the queue drains.
    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "worker started");
        while let Some(task) = self.queue.pop().await {
            match self.fetcher.fetch(&task).await {
                Ok(fetched) => match extract_listing(&fetched.body, &task.url) {
                    Ok(raw) => {
                        let record = normalize(&raw);
                        if self.dedup.mark(&record.id) {
                            self.sink.emit(record);
                            self.records.fetch_add(1, Ordering::Relaxed);
                        } else {
                            debug!(url = %task.url, "duplicate listing dropped");
                            self.duplicates.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(err) => self.record_skip(&task.url, &err),
                },
                Err(fatal @ ScrapeError::PoolExhausted { .. }) => {
                    warn!(url = %task.url, "aborting run: {fatal}");
                    *self.fatal.lock().expect("fatal slot lock poisoned") = Some(fatal);
                    self.queue.shutdown();
                    let _ = self.stop.send(true);
                    break;
                }
                Err(err) => self.record_skip(&task.url, &err),
            }
        }
        debug!(worker_id, "worker finished");
    }
}

/// Fixed-size scrape pipeline.
pub struct Pipeline {
    fetcher: Arc<Fetcher>,
    workers: usize,
    max_records: usize,
}

impl Pipeline {
    pub fn new(fetcher: Arc<Fetcher>, workers: usize, max_records: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
            max_records,
        }
    }

    /// Run to completion over the given start URLs.
    ///
    /// Detail URLs are enqueued directly; search URLs are walked page by
    /// page. The detail-task budget is shared across all start URLs.
    pub async fn run(
        &self,
        start_urls: &[String],
        sink: Arc<dyn RecordSink>,
    ) -> Result<PipelineStats, ScrapeError> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ctx = Arc::new(RunCtx {
            fetcher: Arc::clone(&self.fetcher),
            queue: TaskQueue::new(),
            dedup: DedupStore::new(),
            sink,
            records: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            skips: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            stop: stop_tx,
        });

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            handles.push(tokio::spawn(Arc::clone(&ctx).worker_loop(worker_id)));
        }

        let mut driver = PaginationDriver::new(Arc::clone(&self.fetcher), self.max_records);
        let mut pages_fetched = 0usize;
        let mut final_state = PageState::Exhausted;
        let mut walk_error = None;

        {
            let queue_ctx = Arc::clone(&ctx);
            let mut emit = |task: CrawlTask| queue_ctx.queue.push(task);

            for url in start_urls {
                if is_detail_url(url) {
                    driver.emit_detail(url, 0, &mut emit);
                    continue;
                }
                let walk = driver.run(url, &mut emit);
                tokio::select! {
                    result = walk => match result {
                        Ok(summary) => {
                            pages_fetched += summary.pages_fetched;
                            final_state = summary.state;
                            ctx.skips
                                .lock()
                                .expect("skip list lock poisoned")
                                .extend(summary.skips);
                        }
                        Err(err) => {
                            walk_error = Some(err);
                            break;
                        }
                    },
                    _ = stop_rx.changed() => break,
                }
                if driver.budget_reached() {
                    final_state = PageState::BudgetReached;
                    break;
                }
            }
        }

        ctx.queue.close();
        let _ = futures::future::join_all(handles).await;

        if let Some(err) = walk_error {
            return Err(err);
        }
        if let Some(fatal) = ctx.fatal.lock().expect("fatal slot lock poisoned").take() {
            return Err(fatal);
        }

        let stats = PipelineStats {
            records: ctx.records.load(Ordering::Relaxed),
            duplicates: ctx.duplicates.load(Ordering::Relaxed),
            pages_fetched,
            skips: std::mem::take(&mut *ctx.skips.lock().expect("skip list lock poisoned")),
            final_state,
        };
        info!(
            records = stats.records,
            duplicates = stats.duplicates,
            pages = stats.pages_fetched,
            skips = stats.skips.len(),
            state = ?stats.final_state,
            "run finished"
        );
        Ok(stats)
    }
}
