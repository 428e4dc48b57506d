//! Feed state machine.
//!
//! The controller owns the loaded articles, the forward cursor and the
//! viewport position. Page loads run as spawned tasks that report back
//! over a channel as [`FeedEvent`]s; every load carries the generation it
//! was issued under, and results from an older generation are dropped.
//! Dropping the controller drops the receiver, so a load that finishes
//! after teardown is discarded on arrival.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::cursor::{FeedQuery, PageCursor};
use super::pagination::{FetchError, Page, PageLoader, PageRequest};
use super::viewport;
use crate::article::{Article, ArticleId};
use crate::util::catch_task_panic;

/// Event channel capacity. At most two loads are ever in flight.
const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Page sizes and trigger distance for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    /// Size of the first page, larger to front-load first paint
    pub initial_page_size: u32,
    /// Size of every subsequent page
    pub page_size: u32,
    /// Load more once the active item is this close to the end
    pub load_more_threshold: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            initial_page_size: 12,
            page_size: 8,
            load_more_threshold: 3,
        }
    }
}

/// State exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Loading,
    Ready,
    LoadingMore,
    /// Ready, non-empty and no further pages exist
    Exhausted,
    Error,
}

impl FeedStatus {
    /// Articles are loaded and navigable.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            FeedStatus::Ready | FeedStatus::LoadingMore | FeedStatus::Exhausted
        )
    }
}

/// Which kind of load an event answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Initial,
    More,
}

/// Events from background page loads.
#[derive(Debug)]
pub enum FeedEvent {
    /// A page load finished.
    ///
    /// Fields:
    /// - `generation`: The generation counter when this load was spawned
    /// - `kind`: Initial load or load-more
    /// - `result`: The page or the fetch error
    PageLoaded {
        generation: u64,
        kind: LoadKind,
        result: Result<Page, FetchError>,
    },
    /// The load task panicked before producing a result.
    TaskPanicked {
        generation: u64,
        kind: LoadKind,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
}

pub struct FeedController {
    loader: Arc<dyn PageLoader>,
    settings: FeedSettings,
    query: FeedQuery,
    phase: Phase,
    loaded: Vec<Article>,
    loaded_ids: HashSet<ArticleId>,
    cursor: Option<PageCursor>,
    has_more: bool,
    active_index: usize,
    loading_more: bool,
    /// Message of the last blocking (initial-load) failure
    error: Option<String>,
    /// Message of the last background (load-more) failure
    background_error: Option<String>,
    generation: u64,
    event_tx: mpsc::Sender<FeedEvent>,
    event_rx: mpsc::Receiver<FeedEvent>,
}

impl FeedController {
    pub fn new(loader: Arc<dyn PageLoader>, settings: FeedSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            loader,
            settings,
            query: FeedQuery::Latest,
            phase: Phase::Idle,
            loaded: Vec::new(),
            loaded_ids: HashSet::new(),
            cursor: None,
            has_more: false,
            active_index: 0,
            loading_more: false,
            error: None,
            background_error: None,
            generation: 0,
            event_tx,
            event_rx,
        }
    }

    // ========================================================================
    // Presentation-facing state
    // ========================================================================

    pub fn status(&self) -> FeedStatus {
        match self.phase {
            Phase::Idle => FeedStatus::Idle,
            Phase::Loading => FeedStatus::Loading,
            Phase::Error => FeedStatus::Error,
            Phase::Ready if self.loading_more => FeedStatus::LoadingMore,
            Phase::Ready if !self.has_more && !self.loaded.is_empty() => FeedStatus::Exhausted,
            Phase::Ready => FeedStatus::Ready,
        }
    }

    pub fn articles(&self) -> &[Article] {
        &self.loaded
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_article(&self) -> Option<&Article> {
        self.loaded.get(self.active_index)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    pub fn settings(&self) -> FeedSettings {
        self.settings
    }

    /// Message for the blocking error state, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Message of the most recent non-blocking load-more failure.
    pub fn background_error(&self) -> Option<&str> {
        self.background_error.as_deref()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Issue the initial load. No-op unless idle.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.begin_initial();
        true
    }

    /// Re-attempt the initial load after a failure. No-op unless in error.
    pub fn retry(&mut self) -> bool {
        if self.phase != Phase::Error {
            return false;
        }
        tracing::info!(query = %self.query, "Retrying initial feed load");
        self.begin_initial();
        true
    }

    /// Switch to a different query, discarding the current feed and any
    /// load still in flight for it, then start loading the new one.
    pub fn set_query(&mut self, query: FeedQuery) {
        self.generation += 1;
        self.query = query;
        self.reset();
        self.begin_initial();
    }

    /// Visibility signal from the presentation layer.
    ///
    /// Updates the active index and, when the position crosses the load
    /// threshold, issues a load-more. Returns whether a load was issued.
    pub fn report_visible(&mut self, index: usize) -> bool {
        if self.loaded.is_empty() {
            return false;
        }
        self.active_index = viewport::clamp_index(index, self.loaded.len());

        let trigger = self.phase == Phase::Ready
            && viewport::should_load_more(
                self.active_index,
                self.loaded.len(),
                self.settings.load_more_threshold,
                self.has_more,
                self.loading_more,
            );
        if !trigger {
            return false;
        }

        if self.cursor.is_none() {
            tracing::warn!("More pages reported but no cursor held");
            return false;
        }
        self.load_next_page()
    }

    /// Spawn a load-more from the held cursor, setting the guard first.
    fn load_next_page(&mut self) -> bool {
        let Some(cursor) = self.cursor.clone() else {
            return false;
        };
        self.loading_more = true;
        let request = PageRequest {
            query: self.query.clone(),
            page_size: self.settings.page_size,
            after: Some(cursor),
        };
        self.spawn_load(LoadKind::More, request);
        true
    }

    /// Move to the next article. Never fetches.
    pub fn go_next(&mut self) -> usize {
        self.active_index = viewport::next_index(self.active_index, self.loaded.len());
        self.active_index
    }

    /// Move to the previous article. Never fetches.
    pub fn go_previous(&mut self) -> usize {
        self.active_index = viewport::previous_index(self.active_index, self.loaded.len());
        self.active_index
    }

    /// Whether a load issued under the current generation is outstanding.
    pub fn is_pending(&self) -> bool {
        self.phase == Phase::Loading || self.loading_more
    }

    /// Wait for the next event and apply it.
    pub async fn process_next(&mut self) {
        if let Some(event) = self.event_rx.recv().await {
            self.apply(event);
        }
    }

    /// Apply events until no load is outstanding.
    pub async fn settle(&mut self) {
        while self.is_pending() {
            self.process_next().await;
        }
    }

    /// Apply a finished load to the feed state.
    pub fn apply(&mut self, event: FeedEvent) {
        let (generation, kind, result) = match event {
            FeedEvent::PageLoaded {
                generation,
                kind,
                result,
            } => (generation, kind, result.map_err(|e| e.to_string())),
            FeedEvent::TaskPanicked {
                generation,
                kind,
                error,
            } => {
                tracing::error!(error = %error, "Feed load task panicked");
                (generation, kind, Err(format!("Internal error: {error}")))
            }
        };

        if generation != self.generation {
            tracing::debug!(
                expected = self.generation,
                got = generation,
                "Ignoring stale page load (generation mismatch)"
            );
            return;
        }

        match kind {
            LoadKind::Initial => self.apply_initial(result),
            LoadKind::More => self.apply_more(result),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.loaded.clear();
        self.loaded_ids.clear();
        self.cursor = None;
        self.has_more = false;
        self.active_index = 0;
        self.loading_more = false;
        self.error = None;
        self.background_error = None;
    }

    fn begin_initial(&mut self) {
        self.reset();
        self.phase = Phase::Loading;
        let request = PageRequest {
            query: self.query.clone(),
            page_size: self.settings.initial_page_size,
            after: None,
        };
        tracing::debug!(query = %self.query, page_size = request.page_size, "Starting initial feed load");
        self.spawn_load(LoadKind::Initial, request);
    }

    fn spawn_load(&self, kind: LoadKind, request: PageRequest) {
        let loader = Arc::clone(&self.loader);
        let tx = self.event_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let event = match catch_task_panic(loader.load(request)).await {
                Ok(result) => FeedEvent::PageLoaded {
                    generation,
                    kind,
                    result,
                },
                Err(error) => FeedEvent::TaskPanicked {
                    generation,
                    kind,
                    error,
                },
            };
            // Receiver gone means the controller was torn down
            if tx.send(event).await.is_err() {
                tracing::debug!(generation, "Feed controller gone, discarding page");
            }
        });
    }

    fn apply_initial(&mut self, result: Result<Page, String>) {
        if self.phase != Phase::Loading {
            tracing::debug!("Ignoring initial page outside of loading state");
            return;
        }
        match result {
            Ok(page) => {
                self.append(page.articles);
                self.cursor = page.next_cursor;
                self.has_more = page.has_more;
                self.active_index = 0;
                self.phase = Phase::Ready;
                tracing::info!(
                    count = self.loaded.len(),
                    has_more = self.has_more,
                    "Initial feed page loaded"
                );
                // Nothing on screen can report visibility
                if self.loaded.is_empty() && self.has_more {
                    self.load_next_page();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Initial feed load failed");
                self.loaded.clear();
                self.loaded_ids.clear();
                self.cursor = None;
                self.has_more = false;
                self.error = Some(e);
                self.phase = Phase::Error;
            }
        }
    }

    fn apply_more(&mut self, result: Result<Page, String>) {
        if !self.loading_more {
            tracing::debug!("Ignoring load-more result with no load in flight");
            return;
        }
        self.loading_more = false;

        match result {
            Ok(page) if page.articles.is_empty() && page.next_cursor.is_none() => {
                tracing::debug!("Empty continuation, end of feed");
                self.has_more = false;
            }
            Ok(page) => {
                let nothing_usable = page.articles.is_empty();
                let added = self.append(page.articles);
                self.cursor = page.next_cursor;
                self.has_more = page.has_more;
                self.background_error = None;
                tracing::debug!(added, total = self.loaded.len(), has_more = self.has_more, "Appended feed page");

                // The cursor moved but no card was added to scroll towards
                if nothing_usable && self.has_more {
                    self.load_next_page();
                }
            }
            Err(e) => {
                // Keep what is loaded; a later scroll re-triggers the load
                tracing::warn!(error = %e, "Load-more failed");
                self.background_error = Some(e);
            }
        }
    }

    /// Append articles, skipping ids already present. Returns the number added.
    fn append(&mut self, articles: Vec<Article>) -> usize {
        let before = self.loaded.len();
        for article in articles {
            if !self.loaded_ids.insert(article.id.clone()) {
                tracing::warn!(article_id = %article.id, "Duplicate article id in feed page, skipping");
                continue;
            }
            self.loaded.push(article);
        }
        self.loaded.len() - before
    }
}
