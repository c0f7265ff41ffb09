use std::collections::HashMap;
use std::sync::Arc;

use tally_shared::{Category, Todo, TodoWithCategory};

/// Pairs each todo with the category its `category_id` names. Unknown or
/// missing ids resolve to no category. Output order follows `todos`.
pub fn project(todos: &[Todo], categories: &[Category]) -> Vec<TodoWithCategory> {
    let by_id: HashMap<i64, &Category> = categories.iter().map(|c| (c.id, c)).collect();

    todos
        .iter()
        .map(|todo| TodoWithCategory {
            todo: todo.clone(),
            category: todo
                .category_id
                .and_then(|id| by_id.get(&id))
                .map(|category| (*category).clone()),
        })
        .collect()
}

/// Remembers the last projection and reuses it while both inputs are the same
/// allocations. `S` is whatever holds the todos (a `Vec`, a server page).
pub struct JoinMemo<S> {
    last: Option<(Arc<S>, Arc<Vec<Category>>, Arc<Vec<TodoWithCategory>>)>,
}

impl<S> Default for JoinMemo<S> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<S> JoinMemo<S> {
    pub fn project<F>(
        &mut self,
        source: &Arc<S>,
        categories: &Arc<Vec<Category>>,
        todos: F,
    ) -> Arc<Vec<TodoWithCategory>>
    where
        F: FnOnce(&S) -> &[Todo],
    {
        if let Some((s, c, joined)) = self.last.as_ref()
            && Arc::ptr_eq(s, source)
            && Arc::ptr_eq(c, categories)
        {
            return Arc::clone(joined);
        }

        let joined = Arc::new(project(todos(source), categories));
        self.last = Some((Arc::clone(source), Arc::clone(categories), Arc::clone(&joined)));
        joined
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tally_shared::Priority;

    use super::*;

    fn todo(id: i64, category_id: Option<i64>) -> Todo {
        let now = Utc::now();
        Todo {
            id,
            title: format!("todo {id}"),
            description: String::new(),
            completed: false,
            category_id,
            priority: Priority::Medium,
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn category(id: i64, name: &str) -> Category {
        Category {
            id,
            name: name.to_string(),
            color: "#3B82F6".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn resolves_by_id_and_keeps_order() {
        let todos = vec![todo(5, Some(2)), todo(1, None), todo(3, Some(9)), todo(2, Some(1))];
        let categories = vec![category(1, "Work"), category(2, "Home")];

        let joined = project(&todos, &categories);

        let ids: Vec<i64> = joined.iter().map(|t| t.todo.id).collect();
        assert_eq!(ids, vec![5, 1, 3, 2]);
        for (row, source) in joined.iter().zip(&todos) {
            let expected = categories.iter().find(|c| Some(c.id) == source.category_id);
            assert_eq!(row.category.as_ref(), expected);
        }
        assert_eq!(joined[0].category.as_ref().map(|c| c.name.as_str()), Some("Home"));
        assert!(joined[2].category.is_none(), "dangling id degrades to no category");
    }

    #[test]
    fn memo_reuses_only_for_identical_inputs() {
        let todos = Arc::new(vec![todo(1, Some(1))]);
        let categories = Arc::new(vec![category(1, "Work")]);
        let mut memo: JoinMemo<Vec<Todo>> = JoinMemo::default();

        let first = memo.project(&todos, &categories, |v| v.as_slice());
        let second = memo.project(&todos, &categories, |v| v.as_slice());
        assert!(Arc::ptr_eq(&first, &second));

        let renamed = Arc::new(vec![category(1, "Office")]);
        let third = memo.project(&todos, &renamed, |v| v.as_slice());
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third[0].category.as_ref().map(|c| c.name.as_str()), Some("Office"));
    }
}
