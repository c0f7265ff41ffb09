use std::str::FromStr;

use tally_shared::{
  Priority,
  SortField,
  SortOrder,
  Todo,
  TodoQuery
};
use tracing::trace;

use crate::pagination::Pagination;

/// Where filter predicates are
/// evaluated. Fixed per deployment.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum FilterMode {
  /// Predicates become query
  /// parameters; the backend matches.
  #[default]
  Server,
  /// The whole collection is loaded
  /// once and matched locally.
  Client
}

impl FromStr for FilterMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "server" => Ok(FilterMode::Server),
      | "client" => Ok(FilterMode::Client),
      | other => Err(anyhow::anyhow!(
        "invalid filter mode: {other} \
         (expected server or client)"
      ))
    }
  }
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
)]
pub struct TodoFilters {
  pub search_query: String,
  pub category_id:  Option<i64>,
  pub priority:     Option<Priority>,
  pub completed:    Option<bool>
}

/// Partial filter update. Outer
/// `None` leaves a field alone;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct FilterPatch {
  pub search_query: Option<String>,
  pub category_id:  Option<Option<i64>>,
  pub priority: Option<Option<Priority>>,
  pub completed:    Option<Option<bool>>
}

impl FilterPatch {
  pub fn search(
    query: impl Into<String>
  ) -> Self {
    Self {
      search_query: Some(query.into()),
      ..Self::default()
    }
  }

  pub fn category(
    id: Option<i64>
  ) -> Self {
    Self {
      category_id: Some(id),
      ..Self::default()
    }
  }

  pub fn priority(
    priority: Option<Priority>
  ) -> Self {
    Self {
      priority: Some(priority),
      ..Self::default()
    }
  }

  pub fn completed(
    completed: Option<bool>
  ) -> Self {
    Self {
      completed: Some(completed),
      ..Self::default()
    }
  }
}

impl TodoFilters {
  /// Returns whether anything
  /// changed.
  pub fn apply(
    &mut self,
    patch: FilterPatch
  ) -> bool {
    let before = self.clone();
    if let Some(search) =
      patch.search_query
    {
      self.search_query = search;
    }
    if let Some(category_id) =
      patch.category_id
    {
      self.category_id = category_id;
    }
    if let Some(priority) = patch.priority
    {
      self.priority = priority;
    }
    if let Some(completed) =
      patch.completed
    {
      self.completed = completed;
    }
    *self != before
  }

  pub fn is_active(&self) -> bool {
    *self != TodoFilters::default()
  }

  /// Client-side evaluation: every
  /// active predicate must hold.
  pub fn matches(
    &self,
    todo: &Todo
  ) -> bool {
    if !self.search_query.is_empty() {
      let needle =
        self.search_query.to_lowercase();
      if !todo
        .title
        .to_lowercase()
        .contains(&needle)
      {
        return false;
      }
    }

    if let Some(category_id) =
      self.category_id
      && todo.category_id
        != Some(category_id)
    {
      return false;
    }

    if let Some(priority) = self.priority
      && todo.priority != priority
    {
      return false;
    }

    if let Some(completed) = self.completed
      && todo.completed != completed
    {
      return false;
    }

    true
  }

  pub fn filter<'a>(
    &self,
    todos: &'a [Todo]
  ) -> Vec<&'a Todo> {
    let out: Vec<&Todo> = todos
      .iter()
      .filter(|todo| self.matches(todo))
      .collect();
    trace!(
      before = todos.len(),
      after = out.len(),
      "applied client filters"
    );
    out
  }

  /// Server-side evaluation: the
  /// predicates as query parameters.
  pub fn to_query(
    &self,
    page: u32,
    limit: u32
  ) -> TodoQuery {
    let mut query =
      TodoQuery::new(page, limit);
    if !self.search_query.is_empty() {
      query.search =
        Some(self.search_query.clone());
    }
    query.category_id = self.category_id;
    query.priority = self.priority;
    query.completed = self.completed;
    query
  }
}

/// Filters plus the page cursor they
/// drive. Any filter change sends the
/// cursor back to page 1.
#[derive(Debug, Clone)]
pub struct QueryState {
  filters:    TodoFilters,
  pagination: Pagination,
  mode:       FilterMode,
  sort:       Option<(SortField, SortOrder)>
}

impl QueryState {
  pub fn new(
    mode: FilterMode,
    page_size: usize
  ) -> Self {
    Self {
      filters: TodoFilters::default(),
      pagination: Pagination::new(
        page_size
      ),
      mode,
      sort: None
    }
  }

  pub fn mode(&self) -> FilterMode {
    self.mode
  }

  pub fn filters(&self) -> &TodoFilters {
    &self.filters
  }

  pub fn pagination(&self) -> &Pagination {
    &self.pagination
  }

  pub fn pagination_mut(
    &mut self
  ) -> &mut Pagination {
    &mut self.pagination
  }

  pub fn has_active_filters(
    &self
  ) -> bool {
    self.filters.is_active()
  }

  pub fn set_filter(
    &mut self,
    patch: FilterPatch
  ) -> bool {
    let changed = self.filters.apply(patch);
    if changed {
      self.pagination.reset();
    }
    changed
  }

  pub fn clear_filters(&mut self) -> bool {
    let changed = self.filters.is_active();
    self.filters = TodoFilters::default();
    if changed {
      self.pagination.reset();
    }
    changed
  }

  pub fn set_sort(
    &mut self,
    field: SortField,
    order: SortOrder
  ) {
    if self.sort != Some((field, order)) {
      self.sort = Some((field, order));
      self.pagination.reset();
    }
  }

  pub fn go_to_page(
    &mut self,
    page: usize
  ) -> bool {
    self.pagination.go_to_page(page)
  }

  /// Parameters for the next server
  /// fetch.
  pub fn current_query(&self) -> TodoQuery {
    let mut query = self.filters.to_query(
      self.pagination.current_page()
        as u32,
      self.pagination.page_size() as u32
    );
    if let Some((field, order)) = self.sort
    {
      query.sort_by = Some(field);
      query.sort_order = Some(order);
    }
    query
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use tally_shared::{
    Priority,
    Todo
  };

  use super::*;

  fn todo(
    id: i64,
    title: &str,
    category_id: Option<i64>,
    priority: Priority
  ) -> Todo {
    let now = Utc::now();
    Todo {
      id,
      title: title.to_string(),
      description: String::new(),
      completed: false,
      category_id,
      priority,
      due_date: None,
      created_at: now,
      updated_at: now
    }
  }

  #[test]
  fn search_and_category_are_anded() {
    let todos = vec![
      todo(
        1,
        "Go Shopping",
        Some(3),
        Priority::Low
      ),
      todo(
        2,
        "shopping list",
        Some(2),
        Priority::High
      ),
      todo(
        3,
        "Workshop prep",
        Some(3),
        Priority::Medium
      ),
      todo(4, "Laundry", Some(3), Priority::Low),
    ];

    let mut state =
      QueryState::new(FilterMode::Client, 10);
    state.set_filter(FilterPatch::search(
      "shop"
    ));
    state
      .set_filter(FilterPatch::category(
        Some(3)
      ));

    let ids: Vec<i64> = state
      .filters()
      .filter(&todos)
      .iter()
      .map(|t| t.id)
      .collect();
    assert_eq!(ids, vec![1, 3]);
  }

  #[test]
  fn any_filter_change_resets_page() {
    let mut state =
      QueryState::new(FilterMode::Server, 10);
    state.pagination_mut().set_total(50);
    assert!(state.go_to_page(4));

    assert!(state.set_filter(
      FilterPatch::priority(Some(
        Priority::High
      ))
    ));
    assert_eq!(
      state.pagination().current_page(),
      1
    );

    state.pagination_mut().set_total(50);
    assert!(state.go_to_page(2));
    assert!(!state.set_filter(
      FilterPatch::priority(Some(
        Priority::High
      ))
    ));
    assert_eq!(
      state.pagination().current_page(),
      2
    );

    assert!(state.clear_filters());
    assert_eq!(
      state.pagination().current_page(),
      1
    );
    assert!(!state.has_active_filters());
  }

  #[test]
  fn server_query_carries_active_filters_only()
   {
    let mut state =
      QueryState::new(FilterMode::Server, 10);
    state.set_filter(FilterPatch {
      search_query: Some("x".to_string()),
      completed: Some(Some(true)),
      ..FilterPatch::default()
    });
    assert!(state.has_active_filters());

    let query = state.current_query();
    assert_eq!(
      query.canonical(),
      "page=1&limit=10&search=x&\
       completed=true"
    );
  }

  #[test]
  fn filter_mode_parses() {
    assert_eq!(
      "client"
        .parse::<FilterMode>()
        .expect("client"),
      FilterMode::Client
    );
    assert!(
      "both".parse::<FilterMode>().is_err()
    );
  }
}
