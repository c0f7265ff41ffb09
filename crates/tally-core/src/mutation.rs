//! Confirm-then-apply writes.
//!
//! Every mutation goes through [`MutationOrchestrator::run`]: it claims the
//! target (a second write to the same todo or category is rejected with
//! [`TallyError::Busy`] while the first is in flight), validates, calls the
//! repository, and on success invalidates the affected cache keys before the
//! caller sees the result. Nothing is written to the cache optimistically, so
//! a failure leaves every cached value as it was.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tally_shared::{Category, Todo};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{Caches, QueryKey, keys};
use crate::error::{Result, TallyError};
use crate::repository::TodoRepository;
use crate::store::StoreEvent;
use crate::validate::{
    CategoryChanges, CategoryDraft, TodoChanges, TodoDraft, ValidationContext, validate,
};

/// Logical resource a mutation writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationTarget {
    NewTodo,
    Todo(i64),
    NewCategory,
    Category(i64),
}

impl fmt::Display for MutationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationTarget::NewTodo => f.write_str("new todo"),
            MutationTarget::Todo(id) => write!(f, "todo {id}"),
            MutationTarget::NewCategory => f.write_str("new category"),
            MutationTarget::Category(id) => write!(f, "category {id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub timezone: Tz,
    pub require_category: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            require_category: true,
        }
    }
}

impl ValidationSettings {
    fn context(&self) -> ValidationContext {
        let mut ctx = ValidationContext::new(Utc::now(), self.timezone);
        ctx.require_category = self.require_category;
        ctx
    }
}

type InFlightSet = Arc<Mutex<HashSet<MutationTarget>>>;

/// Holds a target for the lifetime of one mutation.
struct TargetGuard {
    in_flight: InFlightSet,
    target: MutationTarget,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.target);
    }
}

#[derive(Clone)]
pub struct MutationOrchestrator {
    repo: Arc<dyn TodoRepository>,
    caches: Caches,
    in_flight: InFlightSet,
    validation: ValidationSettings,
    events: broadcast::Sender<StoreEvent>,
}

impl MutationOrchestrator {
    pub fn new(
        repo: Arc<dyn TodoRepository>,
        caches: Caches,
        validation: ValidationSettings,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            repo,
            caches,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            validation,
            events,
        }
    }

    pub fn is_submitting(&self, target: MutationTarget) -> bool {
        self.in_flight.lock().contains(&target)
    }

    fn claim(&self, target: MutationTarget) -> Result<TargetGuard> {
        if !self.in_flight.lock().insert(target) {
            return Err(TallyError::Busy {
                target: target.to_string(),
            });
        }
        Ok(TargetGuard {
            in_flight: Arc::clone(&self.in_flight),
            target,
        })
    }

    async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        target: MutationTarget,
        invalidate: Vec<QueryKey>,
        call: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn TodoRepository>, ValidationContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let request_id = Uuid::new_v4();

        let _guard = match self.claim(target) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(%request_id, operation, %target, "rejected: mutation already in flight");
                return Err(err);
            }
        };

        info!(%request_id, operation, %target, "submitting mutation");
        match call(Arc::clone(&self.repo), self.validation.context()).await {
            Ok(value) => {
                for prefix in invalidate {
                    self.caches.invalidate(&prefix);
                    let _ = self.events.send(StoreEvent::Invalidated { prefix });
                }
                info!(%request_id, operation, %target, "mutation succeeded");
                Ok(value)
            }
            Err(err) => {
                error!(%request_id, operation, %target, error = %err, "mutation failed");
                Err(err)
            }
        }
    }

    pub async fn create_todo(&self, draft: TodoDraft) -> Result<Todo> {
        self.run(
            "create_todo",
            MutationTarget::NewTodo,
            vec![keys::todo_lists()],
            |repo, ctx| async move {
                let request = validate(draft, &ctx)?;
                repo.create_todo(&request).await
            },
        )
        .await
    }

    pub async fn update_todo(&self, id: i64, changes: TodoChanges) -> Result<Todo> {
        self.run(
            "update_todo",
            MutationTarget::Todo(id),
            vec![keys::todo_lists(), keys::todo_detail(id)],
            |repo, ctx| async move {
                let request = validate(changes, &ctx)?;
                repo.update_todo(id, &request).await
            },
        )
        .await
    }

    pub async fn delete_todo(&self, id: i64) -> Result<()> {
        self.run(
            "delete_todo",
            MutationTarget::Todo(id),
            vec![keys::todo_lists(), keys::todo_detail(id)],
            |repo, _| async move { repo.delete_todo(id).await },
        )
        .await
    }

    pub async fn toggle_complete(&self, id: i64) -> Result<Todo> {
        self.run(
            "toggle_complete",
            MutationTarget::Todo(id),
            vec![keys::todo_lists(), keys::todo_detail(id)],
            |repo, _| async move { repo.toggle_complete(id).await },
        )
        .await
    }

    pub async fn create_category(&self, draft: CategoryDraft) -> Result<Category> {
        self.run(
            "create_category",
            MutationTarget::NewCategory,
            vec![keys::category_lists()],
            |repo, ctx| async move {
                let request = validate(draft, &ctx)?;
                repo.create_category(&request).await
            },
        )
        .await
    }

    pub async fn update_category(&self, id: i64, changes: CategoryChanges) -> Result<Category> {
        self.run(
            "update_category",
            MutationTarget::Category(id),
            vec![keys::category_lists(), keys::category_detail(id)],
            |repo, ctx| async move {
                let request = validate(changes, &ctx)?;
                repo.update_category(id, &request).await
            },
        )
        .await
    }

    /// Todos that referenced the category lose it server-side, so every todo
    /// key (lists and details) is invalidated too.
    pub async fn delete_category(&self, id: i64) -> Result<()> {
        self.run(
            "delete_category",
            MutationTarget::Category(id),
            vec![keys::category_lists(), keys::category_detail(id), keys::todos()],
            |repo, _| async move { repo.delete_category(id).await },
        )
        .await
    }
}
