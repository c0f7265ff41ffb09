use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Deserializer,
  Serialize
};
use url::form_urlencoded;

pub const DEFAULT_CATEGORY_COLOR: &str =
  "#3B82F6";

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low
}

impl Priority {
  pub fn as_str(self) -> &'static str {
    match self {
      | Priority::High => "high",
      | Priority::Medium => "medium",
      | Priority::Low => "low"
    }
  }

  /// Higher value sorts first when
  /// ordering by urgency.
  pub fn rank(self) -> u8 {
    match self {
      | Priority::High => 3,
      | Priority::Medium => 2,
      | Priority::Low => 1
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "high" | "h" => Ok(Priority::High),
      | "medium" | "med" | "m" => {
        Ok(Priority::Medium)
      }
      | "low" | "l" => Ok(Priority::Low),
      | _ => Err(
        "Priority must be high, medium, \
         or low"
          .to_string()
      )
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct Category {
  pub id:         i64,
  pub name:       String,
  #[serde(default = "default_color")]
  pub color:      String,
  pub created_at: DateTime<Utc>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct Todo {
  pub id:          i64,
  pub title:       String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub completed:   bool,
  #[serde(default)]
  pub category_id: Option<i64>,
  pub priority:    Priority,
  #[serde(default)]
  pub due_date:    Option<DateTime<Utc>>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>
}

/// A todo paired with its resolved
/// category. Derived on read, never
/// stored.
#[derive(
  Debug,
  Clone,
  Serialize,
  PartialEq,
  Eq,
)]
pub struct TodoWithCategory {
  #[serde(flatten)]
  pub todo:     Todo,
  pub category: Option<Category>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct CreateTodoRequest {
  pub title:       String,
  #[serde(default)]
  pub description: String,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub category_id: Option<i64>,
  pub priority:    Priority,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub due_date:    Option<DateTime<Utc>>
}

/// Partial todo update. `due_date:
/// Some(None)` clears the date and is
/// sent as an explicit `null`.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct UpdateTodoRequest {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub category_id: Option<i64>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub priority:    Option<Priority>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub completed:   Option<bool>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    deserialize_with = "nullable::deserialize"
  )]
  pub due_date:
    Option<Option<DateTime<Utc>>>
}

impl UpdateTodoRequest {
  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.description.is_none()
      && self.category_id.is_none()
      && self.priority.is_none()
      && self.completed.is_none()
      && self.due_date.is_none()
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct CreateCategoryRequest {
  pub name:  String,
  #[serde(default = "default_color")]
  pub color: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct UpdateCategoryRequest {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub name:  Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub color: Option<String>
}

impl UpdateCategoryRequest {
  pub fn is_empty(&self) -> bool {
    self.name.is_none()
      && self.color.is_none()
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
  #[default]
  CreatedAt,
  UpdatedAt,
  Title,
  Priority,
  DueDate
}

impl SortField {
  pub fn as_str(self) -> &'static str {
    match self {
      | SortField::CreatedAt => {
        "created_at"
      }
      | SortField::UpdatedAt => {
        "updated_at"
      }
      | SortField::Title => "title",
      | SortField::Priority => {
        "priority"
      }
      | SortField::DueDate => "due_date"
    }
  }
}

impl FromStr for SortField {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s.trim() {
      | "created_at" => {
        Ok(SortField::CreatedAt)
      }
      | "updated_at" => {
        Ok(SortField::UpdatedAt)
      }
      | "title" => Ok(SortField::Title),
      | "priority" => {
        Ok(SortField::Priority)
      }
      | "due_date" => {
        Ok(SortField::DueDate)
      }
      | other => Err(format!(
        "unknown sort field: {other}"
      ))
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  #[default]
  Desc
}

impl SortOrder {
  pub fn as_str(self) -> &'static str {
    match self {
      | SortOrder::Asc => "asc",
      | SortOrder::Desc => "desc"
    }
  }
}

impl FromStr for SortOrder {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "asc" => Ok(SortOrder::Asc),
      | "desc" => Ok(SortOrder::Desc),
      | other => Err(format!(
        "unknown sort order: {other}"
      ))
    }
  }
}

/// Query parameters of `GET /todos`.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
)]
pub struct TodoQuery {
  pub page:        u32,
  pub limit:       u32,
  #[serde(default)]
  pub search:      Option<String>,
  #[serde(default)]
  pub category_id: Option<i64>,
  #[serde(default)]
  pub priority:    Option<Priority>,
  #[serde(default)]
  pub completed:   Option<bool>,
  #[serde(default)]
  pub sort_by:     Option<SortField>,
  #[serde(default)]
  pub sort_order:  Option<SortOrder>
}

impl TodoQuery {
  pub fn new(
    page: u32,
    limit: u32
  ) -> Self {
    Self {
      page,
      limit,
      search: None,
      category_id: None,
      priority: None,
      completed: None,
      sort_by: None,
      sort_order: None
    }
  }

  /// Pairs in wire order, unset
  /// parameters omitted.
  pub fn to_pairs(
    &self
  ) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if self.page > 0 {
      pairs.push((
        "page",
        self.page.to_string()
      ));
    }
    if self.limit > 0 {
      pairs.push((
        "limit",
        self.limit.to_string()
      ));
    }
    if let Some(search) =
      self.search.as_ref()
      && !search.is_empty()
    {
      pairs
        .push(("search", search.clone()));
    }
    if let Some(sort_by) = self.sort_by {
      pairs.push((
        "sort_by",
        sort_by.as_str().to_string()
      ));
    }
    if let Some(sort_order) =
      self.sort_order
    {
      pairs.push((
        "sort_order",
        sort_order.as_str().to_string()
      ));
    }
    if let Some(category_id) =
      self.category_id
    {
      pairs.push((
        "category_id",
        category_id.to_string()
      ));
    }
    if let Some(priority) = self.priority
    {
      pairs.push((
        "priority",
        priority.as_str().to_string()
      ));
    }
    if let Some(completed) =
      self.completed
    {
      pairs.push((
        "completed",
        completed.to_string()
      ));
    }
    pairs
  }

  /// Form-urlencoded pairs, used as a
  /// cache key segment. Values are
  /// escaped, so `&` or `=` inside a
  /// search cannot forge another key.
  pub fn canonical(&self) -> String {
    form_urlencoded::Serializer::new(
      String::new()
    )
    .extend_pairs(self.to_pairs())
    .finish()
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct PaginationMeta {
  pub current_page: u32,
  pub per_page:     u32,
  pub total:        u64,
  pub total_pages:  u32
}

/// `{code, status, message, data?}`
/// envelope around every
/// non-paginated response.
#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct ApiResponse<T> {
  #[serde(default)]
  pub code:    u16,
  #[serde(default)]
  pub status:  String,
  #[serde(default)]
  pub message: String,
  pub data:    Option<T>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct PaginatedResponse<T> {
  #[serde(default)]
  pub code:       u16,
  #[serde(default)]
  pub status:     String,
  #[serde(default)]
  pub message:    String,
  pub data:       Vec<T>,
  pub pagination: PaginationMeta
}

/// One page of a collection, envelope
/// stripped.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct Page<T> {
  pub data:       Vec<T>,
  pub pagination: PaginationMeta
}

impl<T> From<PaginatedResponse<T>>
  for Page<T>
{
  fn from(
    value: PaginatedResponse<T>
  ) -> Self {
    Self {
      data:       value.data,
      pagination: value.pagination
    }
  }
}

fn default_color() -> String {
  DEFAULT_CATEGORY_COLOR.to_string()
}

mod nullable {
  use super::{
    Deserialize,
    Deserializer
  };

  /// A present key always yields
  /// `Some`, so `null` becomes
  /// `Some(None)` instead of `None`.
  pub fn deserialize<'de, D, T>(
    deserializer: D
  ) -> Result<Option<Option<T>>, D::Error>
  where
    D: Deserializer<'de>,
    T: Deserialize<'de>
  {
    Option::<T>::deserialize(
      deserializer
    )
    .map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_pairs_skip_unset_parameters()
  {
    let mut query = TodoQuery::new(2, 10);
    query.search = Some(String::new());
    query.category_id = Some(3);
    query.completed = Some(false);

    assert_eq!(
      query.canonical(),
      "page=2&limit=10&category_id=3&\
       completed=false"
    );
  }

  #[test]
  fn search_separators_do_not_forge_keys()
  {
    let mut forged = TodoQuery::new(1, 10);
    forged.search =
      Some("a&completed=true".to_string());

    let mut real = TodoQuery::new(1, 10);
    real.search = Some("a".to_string());
    real.completed = Some(true);

    assert_ne!(
      forged.canonical(),
      real.canonical()
    );
    assert_eq!(
      forged.canonical(),
      "page=1&limit=10&\
       search=a%26completed%3Dtrue"
    );
  }

  #[test]
  fn update_due_date_null_is_distinct_from_absent()
   {
    let cleared: UpdateTodoRequest =
      serde_json::from_str(
        r#"{"due_date":null}"#
      )
      .expect("decode cleared");
    assert_eq!(cleared.due_date, Some(None));
    assert!(!cleared.is_empty());

    let absent: UpdateTodoRequest =
      serde_json::from_str(
        r#"{"title":"x"}"#
      )
      .expect("decode absent");
    assert_eq!(absent.due_date, None);

    let encoded = serde_json::to_string(
      &UpdateTodoRequest {
        due_date: Some(None),
        ..Default::default()
      }
    )
    .expect("encode");
    assert_eq!(
      encoded,
      r#"{"due_date":null}"#
    );
  }

  #[test]
  fn category_color_defaults_when_missing()
   {
    let category: Category =
      serde_json::from_str(
        r#"{"id":1,"name":"Work","created_at":"2026-01-01T00:00:00Z"}"#
      )
      .expect("decode category");
    assert_eq!(
      category.color,
      DEFAULT_CATEGORY_COLOR
    );
  }

  #[test]
  fn priority_parses_short_forms() {
    assert_eq!(
      "H".parse::<Priority>(),
      Ok(Priority::High)
    );
    assert_eq!(
      "medium".parse::<Priority>(),
      Ok(Priority::Medium)
    );
    assert!(
      "urgent".parse::<Priority>().is_err()
    );
  }
}
