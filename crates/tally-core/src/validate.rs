//! Input validation for the mutation forms.
//!
//! Each raw input type implements [`Validate`], turning loosely typed form
//! values into the request body the repository accepts. Validation is pure:
//! the clock and timezone arrive through [`ValidationContext`].

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tally_shared::{
    CreateCategoryRequest, CreateTodoRequest, DEFAULT_CATEGORY_COLOR, Priority,
    UpdateCategoryRequest, UpdateTodoRequest,
};

use crate::datetime::{DateInput, start_of_today};
use crate::error::ValidationError;

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const CATEGORY_NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub require_category: bool,
}

impl ValidationContext {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            now,
            timezone,
            require_category: true,
        }
    }
}

pub trait Validate {
    type Output;

    fn validate(self, ctx: &ValidationContext) -> Result<Self::Output, ValidationError>;
}

pub fn validate<S: Validate>(input: S, ctx: &ValidationContext) -> Result<S::Output, ValidationError> {
    input.validate(ctx)
}

/// Raw values of the "new todo" form.
#[derive(Debug, Clone, Default)]
pub struct TodoDraft {
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateInput>,
}

/// Raw values of the "edit todo" form. `due_date: Some(None)` clears the date.
#[derive(Debug, Clone, Default)]
pub struct TodoChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<DateInput>>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryDraft {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryChanges {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl Validate for TodoDraft {
    type Output = CreateTodoRequest;

    fn validate(self, ctx: &ValidationContext) -> Result<CreateTodoRequest, ValidationError> {
        let title = check_title(&self.title)?;
        let description = check_description(self.description.as_deref().unwrap_or_default())?;

        let category_id = match self.category_id {
            Some(id) => Some(check_category_id(id)?),
            None if ctx.require_category => {
                return Err(ValidationError::new("category_id", "Category is required"));
            }
            None => None,
        };

        let priority = self.priority.ok_or_else(|| {
            ValidationError::new("priority", "Priority must be high, medium, or low")
        })?;

        let due_date = self
            .due_date
            .as_ref()
            .map(|input| check_due_date(input, ctx))
            .transpose()?;

        Ok(CreateTodoRequest {
            title,
            description,
            category_id,
            priority,
            due_date,
        })
    }
}

impl Validate for TodoChanges {
    type Output = UpdateTodoRequest;

    fn validate(self, ctx: &ValidationContext) -> Result<UpdateTodoRequest, ValidationError> {
        let request = UpdateTodoRequest {
            title: self.title.as_deref().map(check_title).transpose()?,
            description: self.description.as_deref().map(check_description).transpose()?,
            category_id: self.category_id.map(check_category_id).transpose()?,
            priority: self.priority,
            completed: self.completed,
            due_date: match self.due_date {
                None => None,
                Some(None) => Some(None),
                Some(Some(input)) => Some(Some(check_due_date(&input, ctx)?)),
            },
        };

        if request.is_empty() {
            return Err(ValidationError::new(
                "form",
                "At least one field must be provided for update",
            ));
        }
        Ok(request)
    }
}

impl Validate for CategoryDraft {
    type Output = CreateCategoryRequest;

    fn validate(self, _ctx: &ValidationContext) -> Result<CreateCategoryRequest, ValidationError> {
        let name = check_category_name(&self.name)?;
        let color = match self.color {
            Some(color) => check_color(&color)?,
            None => DEFAULT_CATEGORY_COLOR.to_string(),
        };
        Ok(CreateCategoryRequest { name, color })
    }
}

impl Validate for CategoryChanges {
    type Output = UpdateCategoryRequest;

    fn validate(self, _ctx: &ValidationContext) -> Result<UpdateCategoryRequest, ValidationError> {
        let request = UpdateCategoryRequest {
            name: self.name.as_deref().map(check_category_name).transpose()?,
            color: self.color.as_deref().map(check_color).transpose()?,
        };
        if request.is_empty() {
            return Err(ValidationError::new(
                "form",
                "At least one field must be provided for update",
            ));
        }
        Ok(request)
    }
}

fn check_title(raw: &str) -> Result<String, ValidationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ValidationError::new("title", "Title cannot be empty"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ValidationError::new(
            "title",
            format!("Title must be at most {TITLE_MAX_CHARS} characters"),
        ));
    }
    Ok(title.to_string())
}

fn check_description(raw: &str) -> Result<String, ValidationError> {
    if raw.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(ValidationError::new(
            "description",
            format!("Description must be at most {DESCRIPTION_MAX_CHARS} characters"),
        ));
    }
    Ok(raw.to_string())
}

fn check_category_id(id: i64) -> Result<i64, ValidationError> {
    if id <= 0 {
        return Err(ValidationError::new(
            "category_id",
            "Category ID must be positive",
        ));
    }
    Ok(id)
}

fn check_due_date(input: &DateInput, ctx: &ValidationContext) -> Result<DateTime<Utc>, ValidationError> {
    let due = input
        .normalize(ctx.now, &ctx.timezone)
        .map_err(|_| ValidationError::new("due_date", "Due date is not a valid date"))?;
    let today = start_of_today(ctx.now, &ctx.timezone)
        .map_err(|_| ValidationError::new("due_date", "Due date is not a valid date"))?;
    if due < today {
        return Err(ValidationError::new("due_date", "Due date cannot be in the past"));
    }
    Ok(due)
}

fn check_category_name(raw: &str) -> Result<String, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new("name", "Category name cannot be empty"));
    }
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::new(
            "name",
            "Category name cannot be only whitespace",
        ));
    }
    if name.chars().count() > CATEGORY_NAME_MAX_CHARS {
        return Err(ValidationError::new(
            "name",
            format!("Category name must be at most {CATEGORY_NAME_MAX_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

fn hex_color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").expect("valid hex color regex")
    })
}

fn check_color(raw: &str) -> Result<String, ValidationError> {
    let color = raw.trim();
    if !hex_color_re().is_match(color) {
        return Err(ValidationError::new(
            "color",
            "Color must be a valid hex color (e.g., #3B82F6)",
        ));
    }
    Ok(color.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn ctx() -> ValidationContext {
        let now = Utc
            .with_ymd_and_hms(2026, 10, 18, 15, 30, 0)
            .single()
            .expect("valid now");
        ValidationContext::new(now, chrono_tz::UTC)
    }

    fn draft(title: &str) -> TodoDraft {
        TodoDraft {
            title: title.to_string(),
            category_id: Some(1),
            priority: Some(Priority::High),
            ..Default::default()
        }
    }

    #[test]
    fn title_length_boundary() {
        let ok = validate(draft(&"a".repeat(200)), &ctx()).expect("200 chars accepted");
        assert_eq!(ok.title.len(), 200);

        let err = validate(draft(&"a".repeat(201)), &ctx()).expect_err("201 chars rejected");
        assert_eq!(err.field, "title");
        assert!(err.message.contains("Title"));
    }

    #[test]
    fn blank_title_rejected_and_title_trimmed() {
        assert_eq!(validate(draft(""), &ctx()).expect_err("empty").field, "title");
        assert_eq!(validate(draft("   \t"), &ctx()).expect_err("blank").field, "title");

        let ok = validate(draft("  Ship release  "), &ctx()).expect("trimmed");
        assert_eq!(ok.title, "Ship release");
    }

    #[test]
    fn due_date_boundary_is_start_of_today() {
        let ctx = ctx();
        let today = start_of_today(ctx.now, &ctx.timezone).expect("today");

        let mut accepted = draft("due today");
        accepted.due_date = Some(DateInput::from(today));
        assert_eq!(
            validate(accepted, &ctx).expect("start of today accepted").due_date,
            Some(today)
        );

        let mut rejected = draft("due yesterday");
        rejected.due_date = Some(DateInput::from(today - Duration::days(1)));
        let err = validate(rejected, &ctx).expect_err("yesterday rejected");
        assert_eq!(err.field, "due_date");
        assert_eq!(err.message, "Due date cannot be in the past");

        let mut text = draft("due word");
        text.due_date = Some(DateInput::from("yesterday"));
        assert!(validate(text, &ctx).is_err());
    }

    #[test]
    fn category_requirement_follows_context() {
        let mut no_category = draft("loose");
        no_category.category_id = None;
        let err = validate(no_category.clone(), &ctx()).expect_err("required by default");
        assert_eq!(err.field, "category_id");

        let mut relaxed = ctx();
        relaxed.require_category = false;
        let ok = validate(no_category, &relaxed).expect("optional when relaxed");
        assert_eq!(ok.category_id, None);
    }

    #[test]
    fn missing_priority_rejected() {
        let mut input = draft("no priority");
        input.priority = None;
        assert_eq!(validate(input, &ctx()).expect_err("priority").field, "priority");
    }

    #[test]
    fn empty_changes_rejected() {
        let err = validate(TodoChanges::default(), &ctx()).expect_err("empty update");
        assert_eq!(err.message, "At least one field must be provided for update");

        let clear = TodoChanges {
            due_date: Some(None),
            ..Default::default()
        };
        assert_eq!(validate(clear, &ctx()).expect("clear due").due_date, Some(None));
    }

    #[test]
    fn category_name_and_color_rules() {
        let ok = validate(
            CategoryDraft {
                name: " Work ".to_string(),
                color: None,
            },
            &ctx(),
        )
        .expect("valid category");
        assert_eq!(ok.name, "Work");
        assert_eq!(ok.color, DEFAULT_CATEGORY_COLOR);

        let whitespace = validate(
            CategoryDraft {
                name: "   ".to_string(),
                color: None,
            },
            &ctx(),
        )
        .expect_err("whitespace name");
        assert_eq!(whitespace.message, "Category name cannot be only whitespace");

        let long = validate(
            CategoryDraft {
                name: "x".repeat(101),
                color: None,
            },
            &ctx(),
        )
        .expect_err("long name");
        assert_eq!(long.field, "name");

        for color in ["#abc", "#3B82F6"] {
            assert!(
                validate(
                    CategoryChanges {
                        name: None,
                        color: Some(color.to_string()),
                    },
                    &ctx(),
                )
                .is_ok()
            );
        }
        let bad = validate(
            CategoryChanges {
                name: None,
                color: Some("blue".to_string()),
            },
            &ctx(),
        )
        .expect_err("bad color");
        assert_eq!(bad.field, "color");
    }
}
