//! The explicitly constructed context every front end talks to.
//!
//! [`TodoStore`] owns the query state, reads through the resource caches,
//! joins todos with their categories, and exposes the mutation orchestrator.
//! State changes never fetch on their own: they publish a [`StoreEvent`] and
//! the caller decides when to [`TodoStore::refresh`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono_tz::Tz;
use parking_lot::Mutex;
use tally_shared::{
    Category, Page, PaginationMeta, SortField, SortOrder, Todo, TodoQuery, TodoWithCategory,
};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::cache::{Caches, DEFAULT_FRESHNESS, QueryKey, keys};
use crate::error::{Result, TallyError};
use crate::filter::{FilterMode, FilterPatch, QueryState, TodoFilters};
use crate::join::{JoinMemo, project};
use crate::mutation::{MutationOrchestrator, ValidationSettings};
use crate::repository::TodoRepository;
use crate::validate::TodoChanges;

/// Page size used when client mode pulls the whole collection.
const FETCH_ALL_LIMIT: u32 = 100;
/// A refresh that lands past the last page refetches at most this often.
const MAX_REFRESH_ROUNDS: usize = 3;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub page_size: usize,
    pub filter_mode: FilterMode,
    pub freshness: Duration,
    pub timezone: Tz,
    pub require_category: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            filter_mode: FilterMode::Server,
            freshness: DEFAULT_FRESHNESS,
            timezone: chrono_tz::UTC,
            require_category: true,
        }
    }
}

/// Fetch intents and cache notifications for whoever drives the refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Filters, sort or page changed; the list should be refetched.
    ListQueryChanged { query: TodoQuery },
    /// A mutation marked these keys stale.
    Invalidated { prefix: QueryKey },
    EditOpened { id: i64 },
    EditClosed,
}

/// What the list screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoListView {
    pub items: Arc<Vec<TodoWithCategory>>,
    pub current_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_active_filters: bool,
    /// No items at all (as opposed to no items on this page).
    pub is_empty: bool,
    pub loading: bool,
    pub error: Option<TallyError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(TodoListView),
    /// A newer refresh started while this one was waiting; its result was
    /// dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct EditSession {
    generation: u64,
    target: Option<i64>,
    todo: Option<Todo>,
}

pub struct TodoStore {
    repo: Arc<dyn TodoRepository>,
    caches: Caches,
    mutations: MutationOrchestrator,
    events: broadcast::Sender<StoreEvent>,
    query: Mutex<QueryState>,
    list_seq: AtomicU64,
    applied_seq: AtomicU64,
    view: Mutex<TodoListView>,
    memo: Mutex<JoinMemo<Page<Todo>>>,
    edit: Mutex<EditSession>,
}

impl TodoStore {
    pub fn new(repo: Arc<dyn TodoRepository>, options: StoreOptions) -> Self {
        let caches = Caches::new(options.freshness);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mutations = MutationOrchestrator::new(
            Arc::clone(&repo),
            caches.clone(),
            ValidationSettings {
                timezone: options.timezone,
                require_category: options.require_category,
            },
            events.clone(),
        );

        debug!(
            page_size = options.page_size,
            mode = ?options.filter_mode,
            freshness_secs = options.freshness.as_secs(),
            "store constructed"
        );

        Self {
            repo,
            caches,
            mutations,
            events,
            query: Mutex::new(QueryState::new(options.filter_mode, options.page_size)),
            list_seq: AtomicU64::new(0),
            applied_seq: AtomicU64::new(0),
            view: Mutex::new(TodoListView::default()),
            memo: Mutex::new(JoinMemo::default()),
            edit: Mutex::new(EditSession::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn mutations(&self) -> &MutationOrchestrator {
        &self.mutations
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn set_freshness_window(&self, window: Duration) {
        self.caches.set_freshness_window(window);
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    fn emit_query_changed(&self) {
        let query = self.current_query();
        self.emit(StoreEvent::ListQueryChanged { query });
    }

    // ---- query state -------------------------------------------------

    pub fn filter_mode(&self) -> FilterMode {
        self.query.lock().mode()
    }

    pub fn filters(&self) -> TodoFilters {
        self.query.lock().filters().clone()
    }

    pub fn current_query(&self) -> TodoQuery {
        self.query.lock().current_query()
    }

    pub fn current_page(&self) -> usize {
        self.query.lock().pagination().current_page()
    }

    /// Returns whether the filters changed. A change sends the cursor back
    /// to page 1 and publishes a fetch intent.
    pub fn set_filter(&self, patch: FilterPatch) -> bool {
        let changed = self.query.lock().set_filter(patch);
        if changed {
            self.emit_query_changed();
        }
        changed
    }

    pub fn clear_filters(&self) -> bool {
        let changed = self.query.lock().clear_filters();
        if changed {
            self.emit_query_changed();
        }
        changed
    }

    pub fn set_sort(&self, field: SortField, order: SortOrder) {
        self.query.lock().set_sort(field, order);
        self.emit_query_changed();
    }

    /// No-op outside `1..=total_pages` of the last applied view.
    pub fn go_to_page(&self, page: usize) -> bool {
        let moved = self.query.lock().go_to_page(page);
        if moved {
            self.emit_query_changed();
        }
        moved
    }

    // ---- reads -------------------------------------------------------

    /// Last applied list view.
    pub fn view(&self) -> TodoListView {
        let mut view = self.view.lock().clone();
        view.loading =
            self.applied_seq.load(Ordering::SeqCst) < self.list_seq.load(Ordering::SeqCst);
        view
    }

    pub async fn categories(&self) -> Result<Arc<Vec<Category>>> {
        let repo = Arc::clone(&self.repo);
        self.caches
            .category_lists
            .fetch(keys::category_list(), move || async move { repo.list_categories().await })
            .await
    }

    pub async fn todo(&self, id: i64) -> Result<Arc<Todo>> {
        let repo = Arc::clone(&self.repo);
        self.caches
            .todo_details
            .fetch(keys::todo_detail(id), move || async move { repo.get_todo(id).await })
            .await
    }

    pub async fn category(&self, id: i64) -> Result<Arc<Category>> {
        let repo = Arc::clone(&self.repo);
        self.caches
            .category_details
            .fetch(keys::category_detail(id), move || async move {
                repo.get_category(id).await
            })
            .await
    }

    async fn fetch_page(&self, query: TodoQuery) -> Result<Arc<Page<Todo>>> {
        let repo = Arc::clone(&self.repo);
        self.caches
            .todo_lists
            .fetch(keys::todo_list(&query), move || async move {
                repo.list_todos(&query).await
            })
            .await
    }

    /// Whole collection in server order, for client-side filtering.
    async fn fetch_all(&self) -> Result<Arc<Page<Todo>>> {
        let repo = Arc::clone(&self.repo);
        self.caches
            .todo_lists
            .fetch(keys::todo_list_all(), move || async move {
                let mut query = TodoQuery::new(1, FETCH_ALL_LIMIT);
                let first = repo.list_todos(&query).await?;
                let mut data = first.data;
                for page in 2..=first.pagination.total_pages {
                    query.page = page;
                    data.extend(repo.list_todos(&query).await?.data);
                }
                let total = data.len();
                Ok(Page {
                    data,
                    pagination: PaginationMeta {
                        current_page: 1,
                        per_page: total as u32,
                        total: total as u64,
                        total_pages: u32::from(total > 0),
                    },
                })
            })
            .await
    }

    /// Loads the current page and its categories and applies them, unless a
    /// newer refresh started meanwhile. A failed load keeps the previous
    /// items visible with the error attached, and the error is returned.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let seq = self.list_seq.fetch_add(1, Ordering::SeqCst) + 1;

        for round in 1..=MAX_REFRESH_ROUNDS {
            let (mode, query) = {
                let state = self.query.lock();
                (state.mode(), state.current_query())
            };

            let (categories, todos) = match mode {
                FilterMode::Server => {
                    tokio::join!(self.categories(), self.fetch_page(query.clone()))
                }
                FilterMode::Client => tokio::join!(self.categories(), self.fetch_all()),
            };

            if self.list_seq.load(Ordering::SeqCst) != seq {
                debug!(seq, query = %query.canonical(), "discarding superseded list response");
                return Ok(RefreshOutcome::Superseded);
            }

            let todos = match todos {
                Ok(todos) => todos,
                Err(err) => return Err(self.apply_failure(seq, err)),
            };
            let (categories, category_error) = match categories {
                Ok(categories) => (categories, None),
                Err(err) => {
                    warn!(error = %err, "categories unavailable; showing todos without them");
                    let previous = self
                        .caches
                        .category_lists
                        .get(&keys::category_list())
                        .data()
                        .cloned()
                        .unwrap_or_default();
                    (previous, Some(err))
                }
            };

            let mut state = self.query.lock();
            let items = match mode {
                FilterMode::Server => {
                    let moved = state.pagination_mut().set_total(todos.pagination.total as usize);
                    if moved && round < MAX_REFRESH_ROUNDS {
                        debug!(
                            page = state.pagination().current_page(),
                            "page past the end; refetching last page"
                        );
                        continue;
                    }
                    self.memo
                        .lock()
                        .project(&todos, &categories, |page| page.data.as_slice())
                }
                FilterMode::Client => {
                    let filtered: Vec<Todo> =
                        state.filters().filter(&todos.data).into_iter().cloned().collect();
                    state.pagination_mut().set_total(filtered.len());
                    Arc::new(project(state.pagination().slice(&filtered), &categories))
                }
            };

            let pagination = state.pagination();
            let view = TodoListView {
                items,
                current_page: pagination.current_page(),
                total_items: pagination.total_items(),
                total_pages: pagination.total_pages(),
                has_active_filters: state.has_active_filters(),
                is_empty: pagination.total_items() == 0,
                loading: false,
                error: category_error.clone(),
            };
            drop(state);

            *self.view.lock() = view.clone();
            self.applied_seq.fetch_max(seq, Ordering::SeqCst);
            debug!(
                seq,
                page = view.current_page,
                items = view.items.len(),
                total = view.total_items,
                "applied list view"
            );

            return match category_error {
                Some(err) => Err(err),
                None => Ok(RefreshOutcome::Applied(view)),
            };
        }

        // Only reachable if the total kept shrinking under every refetch.
        Ok(RefreshOutcome::Applied(self.view()))
    }

    fn apply_failure(&self, seq: u64, err: TallyError) -> TallyError {
        warn!(seq, error = %err, "list refresh failed; keeping previous items");
        let mut view = self.view.lock();
        view.error = Some(err.clone());
        view.loading = false;
        self.applied_seq.fetch_max(seq, Ordering::SeqCst);
        err
    }

    // ---- edit session ------------------------------------------------

    /// Loads todo `id` into the edit slot. Returns `None` when the form was
    /// closed or re-targeted before the load finished.
    pub async fn open_edit(&self, id: i64) -> Result<Option<Todo>> {
        let generation = {
            let mut session = self.edit.lock();
            session.generation += 1;
            session.target = Some(id);
            session.todo = None;
            session.generation
        };
        self.emit(StoreEvent::EditOpened { id });

        let todo = self.todo(id).await?;

        let mut session = self.edit.lock();
        if session.generation != generation {
            debug!(id, generation, current = session.generation, "discarding late edit load");
            return Ok(None);
        }
        session.todo = Some((*todo).clone());
        Ok(session.todo.clone())
    }

    pub fn close_form(&self) {
        {
            let mut session = self.edit.lock();
            session.generation += 1;
            session.target = None;
            session.todo = None;
        }
        self.emit(StoreEvent::EditClosed);
    }

    pub fn editing(&self) -> Option<Todo> {
        self.edit.lock().todo.clone()
    }

    /// Saves `changes` to the todo being edited and closes the form if it
    /// still shows that todo.
    pub async fn submit_edit(&self, changes: TodoChanges) -> Result<Todo> {
        let (id, generation) = {
            let session = self.edit.lock();
            match session.todo.as_ref() {
                Some(todo) => (todo.id, session.generation),
                None => {
                    return Err(TallyError::Validation(crate::error::ValidationError::new(
                        "form",
                        "No todo is being edited",
                    )));
                }
            }
        };

        let updated = self.mutations.update_todo(id, changes).await?;

        let still_open = {
            let mut session = self.edit.lock();
            let still_open = session.generation == generation;
            if still_open {
                session.generation += 1;
                session.target = None;
                session.todo = None;
            }
            still_open
        };
        if still_open {
            self.emit(StoreEvent::EditClosed);
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::repository::MemoryRepository;

    fn store(mode: FilterMode) -> TodoStore {
        let repo = Arc::new(MemoryRepository::with_seed(Utc::now()));
        TodoStore::new(
            repo,
            StoreOptions {
                filter_mode: mode,
                page_size: 2,
                ..StoreOptions::default()
            },
        )
    }

    fn applied(outcome: RefreshOutcome) -> TodoListView {
        match outcome {
            RefreshOutcome::Applied(view) => view,
            RefreshOutcome::Superseded => panic!("refresh was superseded"),
        }
    }

    #[tokio::test]
    async fn refresh_joins_categories() {
        let store = store(FilterMode::Server);
        let view = applied(store.refresh().await.expect("refresh"));

        assert_eq!(view.total_items, 3);
        assert_eq!(view.total_pages, 2);
        assert_eq!(view.items.len(), 2);
        assert!(!view.is_empty);
        let first = &view.items[0];
        assert_eq!(first.todo.id, 1);
        assert_eq!(first.category.as_ref().map(|c| c.name.as_str()), Some("Work"));
        assert!(!store.view().loading);
    }

    #[tokio::test]
    async fn filter_change_publishes_fetch_intent() {
        let store = store(FilterMode::Server);
        let mut events = store.subscribe();
        applied(store.refresh().await.expect("refresh"));
        assert!(store.go_to_page(2));

        assert!(store.set_filter(FilterPatch::search("grocery")));
        assert_eq!(store.current_page(), 1);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let last = seen.last().expect("events published");
        match last {
            StoreEvent::ListQueryChanged { query } => {
                assert_eq!(query.page, 1);
                assert_eq!(query.search.as_deref(), Some("grocery"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let view = applied(store.refresh().await.expect("refresh"));
        assert_eq!(view.total_items, 1);
        assert!(view.has_active_filters);
    }

    #[tokio::test]
    async fn client_mode_pages_locally() {
        let store = store(FilterMode::Client);
        let view = applied(store.refresh().await.expect("refresh"));
        assert_eq!(view.total_pages, 2);
        let loads = store.caches().todo_lists.load_count();

        assert!(store.go_to_page(2));
        let second = applied(store.refresh().await.expect("page 2"));
        assert_eq!(second.items.len(), 1);
        assert_eq!(store.caches().todo_lists.load_count(), loads, "no refetch on page change");

        store.set_filter(FilterPatch::completed(Some(true)));
        let done = applied(store.refresh().await.expect("completed only"));
        assert_eq!(done.total_items, 1);
        assert_eq!(done.items[0].todo.id, 2);
    }

    #[tokio::test]
    async fn edit_load_after_close_is_discarded() {
        let repo = Arc::new(MemoryRepository::with_seed(Utc::now()));
        let store = TodoStore::new(repo.clone(), StoreOptions::default());
        let gate = Arc::new(tokio::sync::Notify::new());

        // A slow detail load already in flight; open_edit joins it.
        let slow = {
            let (repo, gate) = (Arc::clone(&repo), Arc::clone(&gate));
            store.caches().todo_details.fetch(keys::todo_detail(1), move || async move {
                gate.notified().await;
                repo.get_todo(1).await
            })
        };
        let close_then_release = async {
            tokio::task::yield_now().await;
            store.close_form();
            gate.notify_one();
        };

        let (fetched, loaded, ()) = tokio::join!(slow, store.open_edit(1), close_then_release);
        assert_eq!(fetched.expect("detail").id, 1);
        assert_eq!(loaded.expect("load"), None);
        assert_eq!(store.editing(), None);

        let opened = store.open_edit(2).await.expect("open").expect("still open");
        assert_eq!(opened.id, 2);
        let saved = store
            .submit_edit(TodoChanges {
                title: Some("Reread the docs".to_string()),
                ..Default::default()
            })
            .await
            .expect("submit");
        assert_eq!(saved.title, "Reread the docs");
        assert_eq!(store.editing(), None);
    }
}
