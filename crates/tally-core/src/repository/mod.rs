//! Data-access port. The store talks to a [`TodoRepository`] and never knows
//! whether the data lives behind HTTP or in process memory.

use async_trait::async_trait;
use tally_shared::{
    Category, CreateCategoryRequest, CreateTodoRequest, Page, Todo, TodoQuery,
    UpdateCategoryRequest, UpdateTodoRequest,
};

use crate::error::Result;

pub mod http;
pub mod memory;

pub use http::HttpRepository;
pub use memory::MemoryRepository;

#[async_trait]
pub trait TodoRepository: Send + Sync {
    async fn list_todos(&self, query: &TodoQuery) -> Result<Page<Todo>>;
    async fn get_todo(&self, id: i64) -> Result<Todo>;
    async fn create_todo(&self, request: &CreateTodoRequest) -> Result<Todo>;
    async fn update_todo(&self, id: i64, request: &UpdateTodoRequest) -> Result<Todo>;
    async fn delete_todo(&self, id: i64) -> Result<()>;
    async fn toggle_complete(&self, id: i64) -> Result<Todo>;

    async fn list_categories(&self) -> Result<Vec<Category>>;
    async fn get_category(&self, id: i64) -> Result<Category>;
    async fn create_category(&self, request: &CreateCategoryRequest) -> Result<Category>;
    async fn update_category(&self, id: i64, request: &UpdateCategoryRequest) -> Result<Category>;
    /// Also clears `category_id` on every todo that referenced `id`.
    async fn delete_category(&self, id: i64) -> Result<()>;
}
