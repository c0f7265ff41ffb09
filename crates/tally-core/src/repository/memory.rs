use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tally_shared::{
    Category, CreateCategoryRequest, CreateTodoRequest, Page, PaginationMeta, Priority, SortField,
    SortOrder, Todo, TodoQuery, UpdateCategoryRequest, UpdateTodoRequest,
};
use tracing::{debug, info, instrument};

use super::TodoRepository;
use crate::datastore::{DataStore, IdCounters};
use crate::error::{Resource, Result, TallyError};
use crate::pagination::page_slice;

const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Clone, Default)]
struct Collections {
    todos: Vec<Todo>,
    categories: Vec<Category>,
    ids: IdCounters,
}

#[derive(Debug, Default)]
struct State {
    data: Collections,
    last_stamp: Option<DateTime<Utc>>,
}

impl State {
    fn from_data(mut data: Collections) -> Self {
        data.ids = data.ids.covering(&data.todos, &data.categories);
        let last_stamp = data
            .todos
            .iter()
            .map(|todo| todo.updated_at.max(todo.created_at))
            .chain(data.categories.iter().map(|category| category.created_at))
            .max();
        Self { data, last_stamp }
    }

    /// Wall clock, nudged forward so two writes never share a timestamp.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// Process-local backend. Behaves like the REST service (filtering, sorting,
/// pagination envelope, cascading category delete) and optionally mirrors
/// every change into a [`DataStore`] snapshot.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    store: Option<DataStore>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demo dataset: three categories and three todos.
    pub fn with_seed(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(State::from_data(seed(now))),
            store: None,
        }
    }

    /// Loads the snapshot in `data_dir`. An empty snapshot is seeded when
    /// `seed_if_empty` is set.
    #[instrument(skip(data_dir), fields(data_dir = %data_dir.display()))]
    pub fn open(data_dir: &Path, seed_if_empty: bool) -> anyhow::Result<Self> {
        let store = DataStore::open(data_dir)?;
        let data = if store.is_empty()? && seed_if_empty {
            let data = seed(Utc::now());
            store.save_categories(&data.categories)?;
            store.save_todos(&data.todos)?;
            info!("seeded empty snapshot");
            data
        } else {
            Collections {
                todos: store.load_todos()?,
                categories: store.load_categories()?,
                ids: store.load_ids()?,
            }
        };

        info!(
            todos = data.todos.len(),
            categories = data.categories.len(),
            "loaded snapshot"
        );
        Ok(Self {
            state: Mutex::new(State::from_data(data)),
            store: Some(store),
        })
    }

    pub fn todo_count(&self) -> usize {
        self.state.lock().data.todos.len()
    }

    /// Applies `change` to a copy of the collections, persists the copy, and
    /// only then makes it visible. A failed save leaves the state untouched.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut Collections, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let now = state.next_timestamp();
        let mut next = state.data.clone();
        let out = change(&mut next, now)?;

        if let Some(store) = &self.store {
            store
                .save_categories(&next.categories)
                .map_err(TallyError::storage)?;
            store.save_todos(&next.todos).map_err(TallyError::storage)?;
            store.save_ids(next.ids).map_err(TallyError::storage)?;
        }

        state.data = next;
        Ok(out)
    }
}

#[async_trait]
impl TodoRepository for MemoryRepository {
    #[instrument(skip(self), fields(query = %query.canonical()))]
    async fn list_todos(&self, query: &TodoQuery) -> Result<Page<Todo>> {
        let mut matched: Vec<Todo> = {
            let state = self.state.lock();
            state
                .data
                .todos
                .iter()
                .filter(|todo| matches_query(todo, query))
                .cloned()
                .collect()
        };

        let field = query.sort_by.unwrap_or_default();
        let order = query.sort_order.unwrap_or_default();
        matched.sort_by(|a, b| compare_todos(a, b, field, order));

        let limit = if query.limit == 0 { DEFAULT_LIMIT } else { query.limit };
        let page = query.page.max(1);
        let total = matched.len();
        let total_pages = total.div_ceil(limit as usize) as u32;
        let data = page_slice(&matched, page as usize, limit as usize).to_vec();

        debug!(total, returned = data.len(), "listed todos");
        Ok(Page {
            data,
            pagination: PaginationMeta {
                current_page: page,
                per_page: limit,
                total: total as u64,
                total_pages,
            },
        })
    }

    #[instrument(skip(self))]
    async fn get_todo(&self, id: i64) -> Result<Todo> {
        let state = self.state.lock();
        state
            .data
            .todos
            .iter()
            .find(|todo| todo.id == id)
            .cloned()
            .ok_or(TallyError::NotFound {
                resource: Resource::Todo,
                id,
            })
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    async fn create_todo(&self, request: &CreateTodoRequest) -> Result<Todo> {
        let todo = self.commit(|data, now| {
            if let Some(category_id) = request.category_id {
                ensure_category(data, category_id)?;
            }
            let todo = Todo {
                id: data.ids.next_todo_id(),
                title: request.title.clone(),
                description: request.description.clone(),
                completed: false,
                category_id: request.category_id,
                priority: request.priority,
                due_date: request.due_date,
                created_at: now,
                updated_at: now,
            };
            data.todos.push(todo.clone());
            Ok(todo)
        })?;
        info!(id = todo.id, "created todo");
        Ok(todo)
    }

    #[instrument(skip(self, request))]
    async fn update_todo(&self, id: i64, request: &UpdateTodoRequest) -> Result<Todo> {
        self.commit(|data, now| {
            if let Some(category_id) = request.category_id {
                ensure_category(data, category_id)?;
            }
            let todo = find_todo_mut(data, id)?;
            if let Some(title) = &request.title {
                todo.title = title.clone();
            }
            if let Some(description) = &request.description {
                todo.description = description.clone();
            }
            if let Some(category_id) = request.category_id {
                todo.category_id = Some(category_id);
            }
            if let Some(priority) = request.priority {
                todo.priority = priority;
            }
            if let Some(completed) = request.completed {
                todo.completed = completed;
            }
            if let Some(due_date) = request.due_date {
                todo.due_date = due_date;
            }
            todo.updated_at = now;
            Ok(todo.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_todo(&self, id: i64) -> Result<()> {
        self.commit(|data, _| {
            let before = data.todos.len();
            data.todos.retain(|todo| todo.id != id);
            if data.todos.len() == before {
                return Err(TallyError::NotFound {
                    resource: Resource::Todo,
                    id,
                });
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn toggle_complete(&self, id: i64) -> Result<Todo> {
        self.commit(|data, now| {
            let todo = find_todo_mut(data, id)?;
            todo.completed = !todo.completed;
            todo.updated_at = now;
            Ok(todo.clone())
        })
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self.state.lock().data.categories.clone())
    }

    #[instrument(skip(self))]
    async fn get_category(&self, id: i64) -> Result<Category> {
        let state = self.state.lock();
        state
            .data
            .categories
            .iter()
            .find(|category| category.id == id)
            .cloned()
            .ok_or(TallyError::NotFound {
                resource: Resource::Category,
                id,
            })
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_category(&self, request: &CreateCategoryRequest) -> Result<Category> {
        let category = self.commit(|data, now| {
            let category = Category {
                id: data.ids.next_category_id(),
                name: request.name.clone(),
                color: request.color.clone(),
                created_at: now,
            };
            data.categories.push(category.clone());
            Ok(category)
        })?;
        info!(id = category.id, "created category");
        Ok(category)
    }

    #[instrument(skip(self, request))]
    async fn update_category(&self, id: i64, request: &UpdateCategoryRequest) -> Result<Category> {
        self.commit(|data, _| {
            let category = data
                .categories
                .iter_mut()
                .find(|category| category.id == id)
                .ok_or(TallyError::NotFound {
                    resource: Resource::Category,
                    id,
                })?;
            if let Some(name) = &request.name {
                category.name = name.clone();
            }
            if let Some(color) = &request.color {
                category.color = color.clone();
            }
            Ok(category.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_category(&self, id: i64) -> Result<()> {
        let cleared = self.commit(|data, now| {
            ensure_category(data, id).map_err(|_| TallyError::NotFound {
                resource: Resource::Category,
                id,
            })?;
            data.categories.retain(|category| category.id != id);

            let mut cleared = 0usize;
            for todo in data.todos.iter_mut().filter(|t| t.category_id == Some(id)) {
                todo.category_id = None;
                todo.updated_at = now;
                cleared += 1;
            }
            Ok(cleared)
        })?;
        info!(id, cleared, "deleted category");
        Ok(())
    }
}

fn find_todo_mut(data: &mut Collections, id: i64) -> Result<&mut Todo> {
    data.todos
        .iter_mut()
        .find(|todo| todo.id == id)
        .ok_or(TallyError::NotFound {
            resource: Resource::Todo,
            id,
        })
}

fn ensure_category(data: &Collections, id: i64) -> Result<()> {
    if data.categories.iter().any(|category| category.id == id) {
        Ok(())
    } else {
        Err(TallyError::Api {
            code: 400,
            message: format!("Category with ID {id} does not exist"),
        })
    }
}

fn matches_query(todo: &Todo, query: &TodoQuery) -> bool {
    if let Some(search) = query.search.as_deref()
        && !search.is_empty()
        && !todo.title.to_lowercase().contains(&search.to_lowercase())
    {
        return false;
    }
    if let Some(category_id) = query.category_id
        && todo.category_id != Some(category_id)
    {
        return false;
    }
    if let Some(priority) = query.priority
        && todo.priority != priority
    {
        return false;
    }
    if let Some(completed) = query.completed
        && todo.completed != completed
    {
        return false;
    }
    true
}

fn compare_todos(a: &Todo, b: &Todo, field: SortField, order: SortOrder) -> Ordering {
    let ordering = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortField::Priority => a.priority.rank().cmp(&b.priority.rank()),
        SortField::DueDate => cmp_optional(a.due_date.as_ref(), b.due_date.as_ref()),
    }
    .then_with(|| a.id.cmp(&b.id));

    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Missing values sort after present ones in ascending order.
fn cmp_optional<T: Ord>(left: Option<&T>, right: Option<&T>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn seed(now: DateTime<Utc>) -> Collections {
    let category = |id: i64, name: &str, color: &str| Category {
        id,
        name: name.to_string(),
        color: color.to_string(),
        created_at: now - Duration::days(7),
    };
    let categories = vec![
        category(1, "Work", "#3B82F6"),
        category(2, "Personal", "#10B981"),
        category(3, "Shopping", "#F59E0B"),
    ];

    let todos = vec![
        Todo {
            id: 1,
            title: "Complete coding challenge".to_string(),
            description: "Build a full-stack todo application".to_string(),
            completed: false,
            category_id: Some(1),
            priority: Priority::High,
            due_date: Some(now + Duration::days(3)),
            created_at: now,
            updated_at: now,
        },
        Todo {
            id: 2,
            title: "Review React documentation".to_string(),
            description: "Study Context API and hooks patterns".to_string(),
            completed: true,
            category_id: Some(1),
            priority: Priority::Medium,
            due_date: None,
            created_at: now - Duration::days(1),
            updated_at: now,
        },
        Todo {
            id: 3,
            title: "Grocery shopping".to_string(),
            description: "Buy vegetables, fruits, and essentials".to_string(),
            completed: false,
            category_id: Some(3),
            priority: Priority::Low,
            due_date: Some(now + Duration::days(1)),
            created_at: now - Duration::days(2),
            updated_at: now,
        },
    ];

    Collections {
        todos,
        categories,
        ids: IdCounters::default(),
    }
}
