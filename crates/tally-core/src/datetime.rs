use std::sync::OnceLock;

use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

/// A date as it arrives at the
/// boundary. Normalised into a single
/// `DateTime<Utc>` before anything else
/// looks at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
  Timestamp(DateTime<Utc>),
  Date(NaiveDate),
  Text(String)
}

impl From<DateTime<Utc>> for DateInput {
  fn from(value: DateTime<Utc>) -> Self {
    DateInput::Timestamp(value)
  }
}

impl From<NaiveDate> for DateInput {
  fn from(value: NaiveDate) -> Self {
    DateInput::Date(value)
  }
}

impl From<&str> for DateInput {
  fn from(value: &str) -> Self {
    DateInput::Text(value.to_string())
  }
}

impl From<String> for DateInput {
  fn from(value: String) -> Self {
    DateInput::Text(value)
  }
}

impl DateInput {
  #[tracing::instrument(skip(now, tz))]
  pub fn normalize(
    &self,
    now: DateTime<Utc>,
    tz: &Tz
  ) -> anyhow::Result<DateTime<Utc>> {
    match self {
      | DateInput::Timestamp(value) => {
        Ok(*value)
      }
      | DateInput::Date(date) => {
        start_of_date(*date, tz)
      }
      | DateInput::Text(raw) => {
        parse_date_expr(raw, now, tz)
      }
    }
  }
}

#[must_use]
pub fn parse_timezone(
  raw: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }
  match trimmed.parse::<Tz>() {
    | Ok(tz) => Some(tz),
    | Err(err) => {
      tracing::warn!(
        timezone = trimmed,
        error = %err,
        "invalid timezone"
      );
      None
    }
  }
}

#[must_use]
pub fn to_local_date(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  dt.with_timezone(tz).date_naive()
}

#[must_use]
pub fn format_local_date(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d")
    .to_string()
}

/// Midnight of the day containing
/// `now`, in `tz`.
pub fn start_of_today(
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  start_of_date(
    to_local_date(now, tz),
    tz
  )
}

pub fn start_of_date(
  date: NaiveDate,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let midnight =
    date.and_hms_opt(0, 0, 0).ok_or_else(
      || {
        anyhow::anyhow!(
          "invalid midnight for {date}"
        )
      }
    )?;
  local_to_utc(midnight, tz)
}

fn local_to_utc(
  naive: NaiveDateTime,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(dt) => {
      Ok(dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      earliest,
      _
    ) => Ok(earliest.with_timezone(&Utc)),
    | LocalResult::None => {
      // Midnight skipped by a DST jump;
      // the first valid instant is an
      // hour later.
      let shifted =
        naive + Duration::hours(1);
      tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
          anyhow::anyhow!(
            "nonexistent local time: \
             {naive}"
          )
        })
    }
  }
}

fn relative_days_re() -> &'static Regex {
  static RE: OnceLock<Regex> =
    OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^\+(\d{1,4})d$")
      .expect("valid relative day regex")
  })
}

/// Accepts RFC 3339 timestamps,
/// `YYYY-MM-DD`, `today`, `tomorrow`,
/// `yesterday` and `+Nd`.
#[tracing::instrument(skip(now, tz))]
pub fn parse_date_expr(
  raw: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let value = raw.trim();
  if value.is_empty() {
    anyhow::bail!("empty date");
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(value)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(naive) =
    NaiveDateTime::parse_from_str(
      value,
      "%Y-%m-%dT%H:%M:%S"
    )
  {
    return local_to_utc(naive, tz);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      value, "%Y-%m-%d"
    )
  {
    return start_of_date(date, tz);
  }

  let today = to_local_date(now, tz);
  let lowered =
    value.to_ascii_lowercase();
  let offset_days = match lowered
    .as_str()
  {
    | "today" => Some(0),
    | "tomorrow" => Some(1),
    | "yesterday" => Some(-1),
    | other => relative_days_re()
      .captures(other)
      .and_then(|caps| {
        caps.get(1)?.as_str().parse::<i64>().ok()
      })
  };

  let Some(days) = offset_days else {
    anyhow::bail!(
      "unrecognized date: {value}"
    );
  };

  start_of_date(
    today + Duration::days(days),
    tz
  )
}
