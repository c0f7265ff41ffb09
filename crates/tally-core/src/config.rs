use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::parse_timezone;
use crate::filter::FilterMode;
use crate::store::StoreOptions;

pub const DEFAULT_API_URL: &str =
  "http://localhost:8080/api";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("api.url", DEFAULT_API_URL),
      ("api.timeout_ms", "10000"),
      ("backend", "remote"),
      ("data.location", "~/.tally"),
      ("page.size", "10"),
      ("filter.mode", "server"),
      ("cache.fresh_secs", "300"),
      ("todo.require_category", "on"),
      ("timezone", "UTC"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    tallyrc_override
  ))]
  pub fn load(
    tallyrc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let tallyrc = resolve_tallyrc_path(
      tallyrc_override
    )?;
    if let Some(path) = tallyrc {
      info!(tallyrc = %path.display(), "loading tallyrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no tallyrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      // Colors are written `#RRGGBB`,
      // so a trailing comment needs
      // whitespace on both sides.
      if let Some((before, _)) =
        line.split_once(" # ")
      {
        line = before.trim();
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Which repository adapter the store
/// is built on.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
pub enum Backend {
  Remote,
  Local
}

impl FromStr for Backend {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "remote" | "http" => {
        Ok(Backend::Remote)
      }
      | "local" | "memory" => {
        Ok(Backend::Local)
      }
      | other => Err(anyhow!(
        "invalid backend: {other} \
         (expected remote or local)"
      ))
    }
  }
}

/// Typed view of [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
  pub api_url:          String,
  pub api_timeout:      Duration,
  pub backend:          Backend,
  pub data_location:    PathBuf,
  pub page_size:        usize,
  pub filter_mode:      FilterMode,
  pub freshness:        Duration,
  pub require_category: bool,
  pub timezone:         Tz,
  pub color:            bool
}

impl Settings {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let timeout_ms: u64 =
      parse_key(cfg, "api.timeout_ms")?;
    let page_size: usize =
      parse_key(cfg, "page.size")?;
    if page_size == 0 {
      return Err(anyhow!(
        "page.size must be at least 1"
      ));
    }
    let fresh_secs: u64 =
      parse_key(cfg, "cache.fresh_secs")?;

    let raw_tz = required(cfg, "timezone")?;
    let timezone = parse_timezone(&raw_tz)
      .ok_or_else(|| {
        anyhow!(
          "invalid timezone: {raw_tz}"
        )
      })?;

    let settings = Settings {
      api_url: required(cfg, "api.url")?,
      api_timeout: Duration::from_millis(
        timeout_ms
      ),
      backend: required(cfg, "backend")?
        .parse()?,
      data_location: expand_tilde(
        Path::new(&required(
          cfg,
          "data.location"
        )?)
      ),
      page_size,
      filter_mode: required(
        cfg,
        "filter.mode"
      )?
      .parse()?,
      freshness: Duration::from_secs(
        fresh_secs
      ),
      require_category: cfg
        .get_bool("todo.require_category")
        .unwrap_or(true),
      timezone,
      color: cfg
        .get_bool("color")
        .unwrap_or(true)
    };

    debug!(
      api_url = %settings.api_url,
      backend = ?settings.backend,
      page_size = settings.page_size,
      mode = ?settings.filter_mode,
      "resolved settings"
    );
    Ok(settings)
  }

  pub fn store_options(
    &self
  ) -> StoreOptions {
    StoreOptions {
      page_size:        self.page_size,
      filter_mode:      self.filter_mode,
      freshness:        self.freshness,
      timezone:         self.timezone,
      require_category: self
        .require_category
    }
  }
}

fn required(
  cfg: &Config,
  key: &str
) -> anyhow::Result<String> {
  cfg.get(key).ok_or_else(|| {
    anyhow!("missing config key: {key}")
  })
}

fn parse_key<T>(
  cfg: &Config,
  key: &str
) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display
{
  let raw = required(cfg, key)?;
  raw.trim().parse::<T>().map_err(|err| {
    anyhow!(
      "invalid value for {key}: {raw} \
       ({err})"
    )
  })
}

#[tracing::instrument(skip(
  settings,
  override_dir
))]
pub fn resolve_data_dir(
  settings: &Settings,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => expand_tilde(path),
    | None => {
      settings.data_location.clone()
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_tallyrc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(tallyrc_env) =
    std::env::var("TALLYRC")
  {
    if tallyrc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      tallyrc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping ~/.tallyrc"
    );
    return Ok(None);
  };
  let candidate = home.join(".tallyrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_resolve_to_settings() {
    let settings = Settings::from_config(
      &Config::default()
    )
    .expect("defaults parse");
    assert_eq!(
      settings.api_url,
      DEFAULT_API_URL
    );
    assert_eq!(
      settings.api_timeout,
      Duration::from_secs(10)
    );
    assert_eq!(
      settings.backend,
      Backend::Remote
    );
    assert_eq!(settings.page_size, 10);
    assert_eq!(
      settings.filter_mode,
      FilterMode::Server
    );
    assert_eq!(
      settings.freshness,
      Duration::from_secs(300)
    );
    assert!(settings.require_category);
  }

  #[test]
  fn rc_file_include_and_overrides() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "filter.mode = client\n"
    )
    .expect("write include");
    let rc = dir.path().join("tallyrc");
    fs::write(
      &rc,
      "# tally settings\n\
       backend = local\n\
       page.size = 5 # small pages\n\
       default.color = #10B981\n\
       include extra.rc\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.get("default.color").as_deref(),
      Some("#10B981")
    );

    cfg.apply_overrides([(
      "rc.todo.require_category"
        .to_string(),
      "off".to_string()
    )]);

    let settings =
      Settings::from_config(&cfg)
        .expect("settings");
    assert_eq!(
      settings.backend,
      Backend::Local
    );
    assert_eq!(settings.page_size, 5);
    assert_eq!(
      settings.filter_mode,
      FilterMode::Client
    );
    assert!(!settings.require_category);
    assert!(
      !settings
        .store_options()
        .require_category
    );
  }

  #[test]
  fn bad_values_are_reported() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "page.size".to_string(),
      "ten".to_string()
    )]);
    let err = Settings::from_config(&cfg)
      .expect_err("bad page size");
    assert!(
      err
        .to_string()
        .contains("page.size")
    );

    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "timezone".to_string(),
      "Mars/Olympus".to_string()
    )]);
    assert!(
      Settings::from_config(&cfg).is_err()
    );
  }
}
