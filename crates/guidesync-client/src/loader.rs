//! Progressive, cancellable loading of a session's items.
//!
//! The first chunk is fetched inline so the caller learns the current
//! total and can render immediately. Remaining chunks are fetched by a background
//! task, one request at a time with a fixed pause between them, each
//! merged into the [`SessionCache`] as it arrives.
//!
//! Only one run per session may be active. Cancellation is checked before
//! each subsequent chunk; a request already sent still merges.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use guidesync_types::{GroupCount, SessionToken, page_count};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::ChunkSource;
use crate::cache::{CacheItem, SessionCache};
use crate::error::ClientError;

/// Progress callback receiving `(loaded, total)` after each merged chunk.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// State of a background load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Chunks are still being fetched.
    Loading {
        /// Items cached so far.
        loaded: usize,
        /// Items the server reported.
        total: usize,
    },
    /// Every scheduled chunk merged.
    Complete {
        /// Items cached.
        loaded: usize,
        /// Items the server reported.
        total: usize,
    },
    /// Cancelled before all chunks were fetched.
    Cancelled {
        /// Items cached when the run stopped.
        loaded: usize,
        /// Items the server reported.
        total: usize,
    },
    /// A chunk failed and scheduling stopped.
    Failed {
        /// Items cached when the run stopped.
        loaded: usize,
        /// Items the server reported.
        total: usize,
        /// One-based page that failed.
        page: usize,
    },
}

impl LoadState {
    /// Whether the run has stopped.
    pub const fn is_finished(&self) -> bool {
        !matches!(self, Self::Loading { .. })
    }

    /// Items cached at this point.
    pub const fn loaded(&self) -> usize {
        match self {
            Self::Loading { loaded, .. }
            | Self::Complete { loaded, .. }
            | Self::Cancelled { loaded, .. }
            | Self::Failed { loaded, .. } => *loaded,
        }
    }
}

/// Handle to the background part of a load.
#[derive(Debug)]
pub struct LoadHandle {
    cancel: CancellationToken,
    state: watch::Receiver<LoadState>,
    task: JoinHandle<Result<LoadState, ClientError>>,
}

impl LoadHandle {
    /// Stop scheduling further chunks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest state.
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.state.clone()
    }

    /// Wait for the run to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ChunkFetch`] if a chunk failed.
    pub async fn wait(self) -> Result<LoadState, ClientError> {
        self.task
            .await
            .map_err(|e| ClientError::Session(format!("load task aborted: {e}")))?
    }
}

/// Result of [`ProgressiveLoader::load_all_progressively`].
#[derive(Debug)]
pub struct LoadOutcome<T> {
    /// Whether the cache already held the reported total, so only chunk 1
    /// was requested.
    pub from_cache: bool,
    /// Items cached when the call returned.
    pub items: Vec<T>,
    /// Group aggregate when the call returned.
    pub groups: Vec<GroupCount>,
    /// Items the server reported.
    pub total: usize,
    /// Background run for the remaining chunks, if any remain.
    pub handle: Option<LoadHandle>,
}

/// Removes a session's active-run entry when dropped.
struct ActiveRun {
    runs: Arc<DashMap<SessionToken, CancellationToken>>,
    token: SessionToken,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let _ = self.runs.remove(&self.token);
    }
}

/// Loads a session's items in chunks into a shared cache.
pub struct ProgressiveLoader<S: ChunkSource> {
    source: Arc<S>,
    cache: Arc<SessionCache<S::Item>>,
    chunk_delay: Duration,
    runs: Arc<DashMap<SessionToken, CancellationToken>>,
}

impl<S> ProgressiveLoader<S>
where
    S: ChunkSource,
    S::Item: CacheItem,
{
    /// Create a loader fetching from `source` into `cache`.
    pub fn new(source: Arc<S>, cache: Arc<SessionCache<S::Item>>, chunk_delay: Duration) -> Self {
        Self {
            source,
            cache,
            chunk_delay,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// The cache this loader fills.
    pub const fn cache(&self) -> &Arc<SessionCache<S::Item>> {
        &self.cache
    }

    /// Whether a run is active for `token`.
    pub fn is_loading(&self, token: &SessionToken) -> bool {
        self.runs.contains_key(token)
    }

    /// Cancel the active run for `token`. Returns `false` if none was active.
    pub fn cancel(&self, token: &SessionToken) -> bool {
        self.runs.get(token).is_some_and(|run| {
            run.cancel();
            true
        })
    }

    /// Load every item of `token`'s collection.
    ///
    /// Fetches chunk 1 to learn the current total. When the cache already
    /// held that many items the call returns them marked `from_cache` and
    /// issues no further requests. Otherwise chunks
    /// `2..=min(pages, max_chunks)` are scheduled on a background task and
    /// the items cached so far are returned with a handle to that task.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::LoadInProgress`] if a run for `token` is
    /// active, or [`ClientError::ChunkFetch`] if chunk 1 fails.
    pub async fn load_all_progressively(
        &self,
        token: &SessionToken,
        on_progress: ProgressFn,
        chunk_size: usize,
        max_chunks: usize,
    ) -> Result<LoadOutcome<S::Item>, ClientError> {
        let cancel = CancellationToken::new();
        let guard = self.begin_run(token, &cancel)?;
        let chunk_size = chunk_size.max(1);
        let max_chunks = max_chunks.max(1);

        let first = self
            .source
            .fetch_chunk(token, 1, chunk_size)
            .await
            .map_err(|e| chunk_error(token, 1, &e))?;
        let reported = first.pagination.total_items;
        let cached = self.cache.len(token);
        let loaded = self
            .cache
            .merge(token, first.items, first.groups.as_deref(), Some(reported));
        let total = reported.max(loaded);

        if cached > 0 && cached >= reported {
            debug!(%token, items = loaded, total, "Serving items from cache");
            let (items, groups) = self.cached_parts(token);
            return Ok(LoadOutcome {
                from_cache: true,
                items,
                groups,
                total,
                handle: None,
            });
        }

        on_progress(loaded, total);
        let pages = page_count(total, chunk_size).min(max_chunks);
        info!(%token, total, pages, chunk_size, "First chunk loaded");

        let handle = (pages > 1 && loaded < total).then(|| {
            let (state_tx, state_rx) = watch::channel(LoadState::Loading { loaded, total });
            let run = BackgroundRun {
                source: Arc::clone(&self.source),
                cache: Arc::clone(&self.cache),
                token: token.clone(),
                on_progress,
                chunk_size,
                chunk_delay: self.chunk_delay,
                max_chunks,
                pages,
                total,
                cancel: cancel.clone(),
                state: state_tx,
            };
            LoadHandle {
                cancel,
                state: state_rx,
                task: tokio::spawn(run.run(guard)),
            }
        });

        let (items, groups) = self.cached_parts(token);
        Ok(LoadOutcome {
            from_cache: false,
            items,
            groups,
            total,
            handle,
        })
    }

    fn cached_parts(&self, token: &SessionToken) -> (Vec<S::Item>, Vec<GroupCount>) {
        self.cache.snapshot(token).map_or_else(
            || (Vec::new(), Vec::new()),
            |s| (s.items, s.groups),
        )
    }

    fn begin_run(
        &self,
        token: &SessionToken,
        cancel: &CancellationToken,
    ) -> Result<ActiveRun, ClientError> {
        match self.runs.entry(token.clone()) {
            Entry::Occupied(_) => Err(ClientError::LoadInProgress(token.to_string())),
            Entry::Vacant(slot) => {
                let _ = slot.insert(cancel.clone());
                Ok(ActiveRun {
                    runs: Arc::clone(&self.runs),
                    token: token.clone(),
                })
            }
        }
    }
}

impl<S: ChunkSource> std::fmt::Debug for ProgressiveLoader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveLoader")
            .field("chunk_delay", &self.chunk_delay)
            .field("active_runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

fn chunk_error(token: &SessionToken, page: usize, e: &ClientError) -> ClientError {
    error!(%token, page, error = %e, "Chunk fetch failed");
    ClientError::ChunkFetch {
        page,
        message: e.to_string(),
    }
}

/// Chunks 2..=pages of one load.
///
/// The total follows what each chunk reports, so a collection that grows
/// mid-run extends the schedule (up to `max_chunks`) and `loaded` never
/// exceeds the reported total.
struct BackgroundRun<S: ChunkSource> {
    source: Arc<S>,
    cache: Arc<SessionCache<S::Item>>,
    token: SessionToken,
    on_progress: ProgressFn,
    chunk_size: usize,
    chunk_delay: Duration,
    max_chunks: usize,
    pages: usize,
    total: usize,
    cancel: CancellationToken,
    state: watch::Sender<LoadState>,
}

impl<S> BackgroundRun<S>
where
    S: ChunkSource,
    S::Item: CacheItem,
{
    async fn run(self, _guard: ActiveRun) -> Result<LoadState, ClientError> {
        let mut loaded = self.cache.len(&self.token);
        let mut total = self.total.max(loaded);
        let mut pages = self.pages;
        let mut page = 2;
        while page <= pages {
            if self.cancel.is_cancelled() {
                return Ok(self.finish(LoadState::Cancelled { loaded, total }));
            }
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(self.finish(LoadState::Cancelled { loaded, total }));
                }
                () = tokio::time::sleep(self.chunk_delay) => {}
            }

            let chunk = match self
                .source
                .fetch_chunk(&self.token, page, self.chunk_size)
                .await
            {
                Ok(chunk) => chunk,
                Err(e) => {
                    let failure = chunk_error(&self.token, page, &e);
                    let _ = self.finish(LoadState::Failed {
                        loaded,
                        total,
                        page,
                    });
                    return Err(failure);
                }
            };
            let reported = chunk.pagination.total_items;
            loaded = self.cache.merge(
                &self.token,
                chunk.items,
                chunk.groups.as_deref(),
                Some(reported),
            );
            if reported != total {
                debug!(token = %self.token, page, from = total, to = reported, "Reported total changed");
            }
            total = reported.max(loaded);
            pages = page_count(total, self.chunk_size).min(self.max_chunks);

            (self.on_progress)(loaded, total);
            self.state.send_replace(LoadState::Loading { loaded, total });
            debug!(token = %self.token, page, loaded, total, "Chunk merged");

            if loaded >= total {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(self.finish(LoadState::Complete { loaded, total }))
    }

    fn finish(&self, state: LoadState) -> LoadState {
        info!(token = %self.token, state = ?state, "Progressive load finished");
        self.state.send_replace(state.clone());
        state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use guidesync_types::{Channel, ChunkResponse, Pagination};

    use super::*;

    /// Serves `total` generated channels, optionally failing one page or
    /// growing the collection once page 1 has been served.
    struct FakeSource {
        total: AtomicUsize,
        fail_page: Option<usize>,
        grow_to: Option<usize>,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(total: usize) -> Self {
            Self {
                total: AtomicUsize::new(total),
                fail_page: None,
                grow_to: None,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChunkSource for FakeSource {
        type Item = Channel;

        async fn fetch_chunk(
            &self,
            _token: &SessionToken,
            page: usize,
            limit: usize,
        ) -> Result<ChunkResponse<Channel>, ClientError> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_page == Some(page) {
                return Err(ClientError::Transport(String::from("connection reset")));
            }
            let total = self.total.load(Ordering::SeqCst);
            let start = (page - 1) * limit;
            let end = (start + limit).min(total);
            let items = (start..end)
                .map(|i| Channel::new(format!("c{i}"), format!("Ch {i}")).in_group("News"))
                .collect();
            if page == 1 {
                if let Some(grown) = self.grow_to {
                    self.total.store(grown, Ordering::SeqCst);
                }
            }
            Ok(ChunkResponse {
                items,
                groups: None,
                pagination: Pagination::new(total, page, limit),
            })
        }
    }

    fn loader(source: FakeSource) -> (Arc<FakeSource>, ProgressiveLoader<FakeSource>) {
        let source = Arc::new(source);
        let loader = ProgressiveLoader::new(
            Arc::clone(&source),
            Arc::new(SessionCache::new()),
            Duration::from_millis(100),
        );
        (source, loader)
    }

    fn recorder() -> (Arc<Mutex<Vec<(usize, usize)>>>, ProgressFn) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let on_progress: ProgressFn = Arc::new(move |loaded, total| {
            sink.lock().unwrap().push((loaded, total));
        });
        (log, on_progress)
    }

    fn token() -> SessionToken {
        SessionToken::parse("abc").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn loads_all_chunks_in_order() {
        let (source, loader) = loader(FakeSource::new(1200));
        let (log, on_progress) = recorder();

        let outcome = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.items.len(), 500);
        assert_eq!(outcome.total, 1200);
        assert_eq!(outcome.groups.first().unwrap().count, 500);

        let state = outcome.handle.unwrap().wait().await.unwrap();
        assert_eq!(
            state,
            LoadState::Complete {
                loaded: 1200,
                total: 1200
            }
        );
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(500, 1200), (1000, 1200), (1200, 1200)]
        );
        assert!(!loader.is_loading(&token()));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_cache_is_served_after_first_chunk() {
        let (source, loader) = loader(FakeSource::new(300));
        let (log, on_progress) = recorder();
        let first = loader
            .load_all_progressively(&token(), Arc::clone(&on_progress), 500, 10)
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert!(first.handle.is_none());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        let second = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert!(second.handle.is_none());
        assert_eq!(second.items.len(), 300);
        assert_eq!(second.total, 300);
        // Only chunk 1 is requested to confirm the total.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(*log.lock().unwrap(), vec![(300, 300)]);
        assert!(!loader.is_loading(&token()));
    }

    #[tokio::test(start_paused = true)]
    async fn grown_collection_is_not_served_from_stale_cache() {
        let (source, loader) = loader(FakeSource::new(300));
        let (log, on_progress) = recorder();
        let first = loader
            .load_all_progressively(&token(), Arc::clone(&on_progress), 500, 10)
            .await
            .unwrap();
        assert!(first.handle.is_none());
        assert!(loader.cache().is_complete(&token()));

        source.total.store(1200, Ordering::SeqCst);
        let second = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();
        assert!(!second.from_cache);
        assert_eq!(second.total, 1200);
        assert_eq!(second.items.len(), 500);

        let state = second.handle.unwrap().wait().await.unwrap();
        assert_eq!(
            state,
            LoadState::Complete {
                loaded: 1200,
                total: 1200
            }
        );
        assert_eq!(loader.cache().len(&token()), 1200);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(300, 300), (500, 1200), (1000, 1200), (1200, 1200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn total_growing_mid_run_extends_schedule() {
        let (source, loader) = loader(FakeSource {
            grow_to: Some(2000),
            ..FakeSource::new(600)
        });
        let (log, on_progress) = recorder();
        let outcome = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();
        assert_eq!(outcome.total, 600);

        let handle = outcome.handle.unwrap();
        let state_rx = handle.watch_state();
        let state = handle.wait().await.unwrap();
        assert_eq!(
            state,
            LoadState::Complete {
                loaded: 2000,
                total: 2000
            }
        );
        assert_eq!(*state_rx.borrow(), state);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);

        let log = log.lock().unwrap();
        assert!(log.iter().all(|(loaded, total)| loaded <= total));
        assert_eq!(
            *log,
            vec![(500, 600), (1000, 2000), (1500, 2000), (2000, 2000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn max_chunks_caps_scheduling() {
        let (source, loader) = loader(FakeSource::new(5000));
        let (_, on_progress) = recorder();
        let outcome = loader
            .load_all_progressively(&token(), on_progress, 500, 3)
            .await
            .unwrap();
        let state = outcome.handle.unwrap().wait().await.unwrap();
        assert_eq!(state.loaded(), 1500);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_stops_and_keeps_earlier_items() {
        let (source, loader) = loader(FakeSource {
            fail_page: Some(2),
            ..FakeSource::new(1200)
        });
        let (_, on_progress) = recorder();
        let outcome = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();

        let result = outcome.handle.unwrap().wait().await;
        assert!(matches!(result, Err(ClientError::ChunkFetch { page: 2, .. })));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(loader.cache().len(&token()), 500);
        assert!(!loader.is_loading(&token()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_before_next_chunk() {
        let (source, loader) = loader(FakeSource::new(1200));
        let (_, on_progress) = recorder();
        let outcome = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await
            .unwrap();

        let handle = outcome.handle.unwrap();
        assert!(loader.cancel(&token()));
        let state = handle.wait().await.unwrap();
        assert_eq!(
            state,
            LoadState::Cancelled {
                loaded: 500,
                total: 1200
            }
        );
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_load_for_same_session_is_rejected() {
        let (_, loader) = loader(FakeSource::new(1200));
        let (_, on_progress) = recorder();
        let outcome = loader
            .load_all_progressively(&token(), Arc::clone(&on_progress), 500, 10)
            .await
            .unwrap();

        let second = loader
            .load_all_progressively(&token(), on_progress, 500, 10)
            .await;
        assert!(matches!(second, Err(ClientError::LoadInProgress(_))));

        let _ = outcome.handle.unwrap().wait().await.unwrap();
    }
}
