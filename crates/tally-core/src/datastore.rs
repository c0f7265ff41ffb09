use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_shared::{Category, Todo};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Highest ids ever handed out. Kept apart from the collections so a
/// deleted record's id is never reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounters {
    pub last_todo_id: i64,
    pub last_category_id: i64,
}

impl IdCounters {
    /// Never below the ids already present in `todos` and `categories`.
    pub fn covering(self, todos: &[Todo], categories: &[Category]) -> Self {
        let max_todo = todos.iter().map(|todo| todo.id).max().unwrap_or(0);
        let max_category = categories.iter().map(|c| c.id).max().unwrap_or(0);
        Self {
            last_todo_id: self.last_todo_id.max(max_todo),
            last_category_id: self.last_category_id.max(max_category),
        }
    }

    pub fn next_todo_id(&mut self) -> i64 {
        self.last_todo_id += 1;
        self.last_todo_id
    }

    pub fn next_category_id(&mut self) -> i64 {
        self.last_category_id += 1;
        self.last_category_id
    }
}

/// JSON-lines snapshot of the local backend: one file per collection plus
/// the id counters, rewritten atomically after every mutation.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub todos_path: PathBuf,
    pub categories_path: PathBuf,
    pub ids_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let todos_path = data_dir.join("todos.data");
        let categories_path = data_dir.join("categories.data");
        let ids_path = data_dir.join("ids.data");

        for path in [&todos_path, &categories_path, &ids_path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            todos = %todos_path.display(),
            categories = %categories_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            todos_path,
            categories_path,
            ids_path,
        })
    }

    /// True when neither file holds a record yet.
    pub fn is_empty(&self) -> anyhow::Result<bool> {
        let todos = fs::metadata(&self.todos_path)?.len();
        let categories = fs::metadata(&self.categories_path)?.len();
        Ok(todos == 0 && categories == 0)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_todos(&self) -> anyhow::Result<Vec<Todo>> {
        load_jsonl(&self.todos_path).context("failed to load todos.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_categories(&self) -> anyhow::Result<Vec<Category>> {
        load_jsonl(&self.categories_path).context("failed to load categories.data")
    }

    /// Zeroed counters when the snapshot predates the ids file.
    #[tracing::instrument(skip(self))]
    pub fn load_ids(&self) -> anyhow::Result<IdCounters> {
        let ids: Vec<IdCounters> =
            load_jsonl(&self.ids_path).context("failed to load ids.data")?;
        Ok(ids.into_iter().next().unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    pub fn save_ids(&self, ids: IdCounters) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.ids_path, &[ids]).context("failed to save ids.data")
    }

    #[tracing::instrument(skip(self, todos))]
    pub fn save_todos(&self, todos: &[Todo]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.todos_path, todos).context("failed to save todos.data")
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn save_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.categories_path, categories)
            .context("failed to save categories.data")
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tally_shared::Priority;

    use super::*;

    #[test]
    fn round_trips_both_collections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        assert!(store.is_empty().expect("sizes"));

        let now = Utc::now();
        let category = Category {
            id: 1,
            name: "Work".to_string(),
            color: "#3B82F6".to_string(),
            created_at: now,
        };
        let todo = Todo {
            id: 1,
            title: "Ship it".to_string(),
            description: String::new(),
            completed: false,
            category_id: Some(1),
            priority: Priority::High,
            due_date: None,
            created_at: now,
            updated_at: now,
        };

        store.save_categories(std::slice::from_ref(&category)).expect("save categories");
        store.save_todos(std::slice::from_ref(&todo)).expect("save todos");

        let reopened = DataStore::open(dir.path()).expect("reopen");
        assert!(!reopened.is_empty().expect("sizes"));
        assert_eq!(reopened.load_categories().expect("categories"), vec![category]);
        assert_eq!(reopened.load_todos().expect("todos"), vec![todo]);
    }

    #[test]
    fn id_counters_persist_and_default_to_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        assert_eq!(store.load_ids().expect("empty ids"), IdCounters::default());

        let mut ids = IdCounters::default();
        assert_eq!(ids.next_todo_id(), 1);
        assert_eq!(ids.next_category_id(), 1);
        store.save_ids(ids).expect("save ids");

        let reopened = DataStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.load_ids().expect("ids"), ids);
    }

    #[test]
    fn corrupt_line_reports_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        fs::write(&store.todos_path, "\n{not json}\n").expect("write");

        let err = store.load_todos().expect_err("corrupt file");
        assert!(format!("{err:#}").contains("line 2"));
    }
}
