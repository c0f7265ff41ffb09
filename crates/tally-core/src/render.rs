use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tally_shared::{Category, Priority, TodoWithCategory};
use unicode_width::UnicodeWidthStr;

use crate::config::Settings;
use crate::datetime::{format_local_date, start_of_today};
use crate::store::TodoListView;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            color: settings.color && io::stdout().is_terminal(),
            timezone: settings.timezone,
        }
    }

    pub fn plain(timezone: Tz) -> Self {
        Self {
            color: false,
            timezone,
        }
    }

    #[tracing::instrument(skip(self, view, now))]
    pub fn print_todo_list(&mut self, view: &TodoListView, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_todo_list(&mut out, view, now)
    }

    pub fn write_todo_list<W: Write>(
        &self,
        mut out: W,
        view: &TodoListView,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if view.is_empty {
            if view.has_active_filters {
                writeln!(out, "No todos match the current filters.")?;
            } else {
                writeln!(out, "No todos yet.")?;
            }
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Pri".to_string(),
            "Due".to_string(),
            "Category".to_string(),
            "Title".to_string(),
        ];
        let today = start_of_today(now, &self.timezone)?;

        let mut rows = Vec::with_capacity(view.items.len());
        for item in view.items.iter() {
            let todo = &item.todo;
            let done = if todo.completed { "x" } else { " " }.to_string();
            let due = match todo.due_date {
                Some(due) => {
                    let text = format_local_date(due, &self.timezone);
                    if due < today && !todo.completed {
                        self.paint(&text, "31")
                    } else {
                        text
                    }
                }
                None => String::new(),
            };
            let category = item
                .category
                .as_ref()
                .map(|category| category.name.clone())
                .unwrap_or_default();

            rows.push(vec![
                self.paint(&todo.id.to_string(), "33"),
                done,
                self.paint_priority(todo.priority),
                due,
                category,
                todo.title.clone(),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "\npage {}/{} ({} todos)",
            view.current_page,
            view.total_pages.max(1),
            view.total_items
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, item))]
    pub fn print_todo_info(&mut self, item: &TodoWithCategory) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_todo_info(&mut out, item)
    }

    pub fn write_todo_info<W: Write>(&self, mut out: W, item: &TodoWithCategory) -> anyhow::Result<()> {
        let todo = &item.todo;
        writeln!(out, "id          {}", todo.id)?;
        writeln!(out, "title       {}", todo.title)?;
        if !todo.description.is_empty() {
            writeln!(out, "description {}", todo.description)?;
        }
        writeln!(out, "completed   {}", if todo.completed { "yes" } else { "no" })?;
        writeln!(out, "priority    {}", todo.priority)?;
        match &item.category {
            Some(category) => writeln!(out, "category    {} ({})", category.name, category.id)?,
            None => writeln!(out, "category    -")?,
        }
        if let Some(due) = todo.due_date {
            writeln!(out, "due         {}", format_local_date(due, &self.timezone))?;
        }
        writeln!(out, "created     {}", todo.created_at.to_rfc3339())?;
        writeln!(out, "updated     {}", todo.updated_at.to_rfc3339())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn print_category_table(&mut self, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if categories.is_empty() {
            writeln!(out, "No categories yet.")?;
            return Ok(());
        }

        let headers = vec!["ID".to_string(), "Color".to_string(), "Name".to_string()];
        let rows = categories
            .iter()
            .map(|category| {
                vec![
                    self.paint(&category.id.to_string(), "33"),
                    category.color.clone(),
                    category.name.clone(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    fn paint_priority(&self, priority: Priority) -> String {
        let code = match priority {
            Priority::High => "31",
            Priority::Medium => "33",
            Priority::Low => "32",
        };
        self.paint(priority.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
