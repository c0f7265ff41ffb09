use anyhow::{Context, anyhow};
use chrono::Utc;
use tally_shared::TodoWithCategory;
use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::datetime::DateInput;
use crate::filter::FilterPatch;
use crate::join::project;
use crate::render::Renderer;
use crate::store::{RefreshOutcome, TodoListView, TodoStore};
use crate::validate::{CategoryChanges, CategoryDraft, TodoChanges, TodoDraft};

#[instrument(skip(store, renderer, command))]
pub async fn dispatch(
    store: &TodoStore,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::List {
            search,
            category,
            priority,
            completed,
            page,
            sort,
            order,
        } => {
            let patch = FilterPatch {
                search_query: search,
                category_id: category.map(Some),
                priority: priority.map(Some),
                completed: completed.map(Some),
            };
            store.set_filter(patch);
            if sort.is_some() || order.is_some() {
                store.set_sort(sort.unwrap_or_default(), order.unwrap_or_default());
            }
            cmd_list(store, renderer, page).await
        }
        Command::Show { id } => cmd_show(store, renderer, id).await,
        Command::Add {
            title,
            description,
            category,
            priority,
            due,
        } => {
            info!("command add");
            let todo = store
                .mutations()
                .create_todo(TodoDraft {
                    title,
                    description,
                    category_id: category,
                    priority: Some(priority),
                    due_date: due.map(DateInput::from),
                })
                .await?;
            println!("Created todo {}.", todo.id);
            Ok(())
        }
        Command::Edit {
            id,
            title,
            description,
            category,
            priority,
            due,
            completed,
        } => {
            info!("command edit");
            let due_date = due.map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "none" | "" => None,
                _ => Some(DateInput::from(raw)),
            });
            let changes = TodoChanges {
                title,
                description,
                category_id: category,
                priority,
                completed,
                due_date,
            };

            if store.open_edit(id).await?.is_none() {
                return Err(anyhow!("todo {id} was closed before it finished loading"));
            }
            let todo = store.submit_edit(changes).await?;
            println!("Updated todo {}.", todo.id);
            Ok(())
        }
        Command::Toggle { id } => {
            info!("command toggle");
            let todo = store.mutations().toggle_complete(id).await?;
            let state = if todo.completed { "done" } else { "open" };
            println!("Todo {} is now {state}.", todo.id);
            Ok(())
        }
        Command::Rm { id } => {
            info!("command rm");
            store.mutations().delete_todo(id).await?;
            println!("Deleted todo {id}.");
            Ok(())
        }
        Command::Categories => {
            info!("command categories");
            let categories = store.categories().await?;
            renderer.print_category_table(&categories)
        }
        Command::CategoryAdd { name, color } => {
            info!("command category-add");
            let category = store
                .mutations()
                .create_category(CategoryDraft { name, color })
                .await?;
            println!("Created category {} ({}).", category.id, category.name);
            Ok(())
        }
        Command::CategoryEdit { id, name, color } => {
            info!("command category-edit");
            let category = store
                .mutations()
                .update_category(id, CategoryChanges { name, color })
                .await?;
            println!("Updated category {} ({}).", category.id, category.name);
            Ok(())
        }
        Command::CategoryRm { id } => {
            info!("command category-rm");
            store.mutations().delete_category(id).await?;
            println!("Deleted category {id}.");
            Ok(())
        }
    }
}

#[instrument(skip(store, renderer))]
async fn cmd_list(
    store: &TodoStore,
    renderer: &mut Renderer,
    page: Option<usize>,
) -> anyhow::Result<()> {
    info!("command list");

    let mut view = applied(store.refresh().await.context("failed to load todos")?)?;
    if let Some(page) = page
        && page != view.current_page
    {
        if !store.go_to_page(page) {
            return Err(anyhow!(
                "page {page} is out of range (1..={})",
                view.total_pages.max(1)
            ));
        }
        view = applied(store.refresh().await.context("failed to load todos")?)?;
    }

    renderer.print_todo_list(&view, Utc::now())
}

#[instrument(skip(store, renderer))]
async fn cmd_show(store: &TodoStore, renderer: &mut Renderer, id: i64) -> anyhow::Result<()> {
    info!("command show");

    let (todo, categories) = tokio::join!(store.todo(id), store.categories());
    let todo = todo?;
    let categories = categories?;

    let item: TodoWithCategory = project(std::slice::from_ref(&*todo), &categories)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("todo {id} could not be joined"))?;
    renderer.print_todo_info(&item)
}

fn applied(outcome: RefreshOutcome) -> anyhow::Result<TodoListView> {
    match outcome {
        RefreshOutcome::Applied(view) => Ok(view),
        RefreshOutcome::Superseded => Err(anyhow!("list refresh was superseded")),
    }
}
