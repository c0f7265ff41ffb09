pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod join;
pub mod mutation;
pub mod pagination;
pub mod render;
pub mod repository;
pub mod store;
pub mod validate;

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::{
  Result,
  TallyError
};
pub use repository::TodoRepository;
pub use store::{
  StoreOptions,
  TodoStore
};

/// Picks the repository adapter the
/// settings ask for.
#[tracing::instrument(skip(
  settings,
  data_override
))]
pub fn build_repository(
  settings: &config::Settings,
  data_override: Option<&Path>
) -> anyhow::Result<Arc<dyn TodoRepository>>
{
  match settings.backend {
    | config::Backend::Remote => {
      let repo =
        repository::HttpRepository::new(
          &settings.api_url,
          settings.api_timeout
        )?;
      info!(url = %repo.base_url(), "using remote backend");
      Ok(Arc::new(repo))
    }
    | config::Backend::Local => {
      let data_dir =
        config::resolve_data_dir(
          settings,
          data_override
        )
        .context(
          "failed to resolve data \
           directory"
        )?;
      let repo =
        repository::MemoryRepository::open(
          &data_dir, true
        )
        .with_context(|| {
          format!(
            "failed to open snapshot at \
             {}",
            data_dir.display()
          )
        })?;
      info!(data_dir = %data_dir.display(), "using local backend");
      Ok(Arc::new(repo))
    }
  }
}

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tally CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.tallyrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let settings =
    config::Settings::from_config(&cfg)
      .context("invalid configuration")?;
  let repo = build_repository(
    &settings,
    cli.data.as_deref()
  )?;
  let store = TodoStore::new(
    repo,
    settings.store_options()
  );
  let mut renderer =
    render::Renderer::new(&settings);

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(commands::dispatch(
    &store,
    &mut renderer,
    cli.command.unwrap_or_default()
  ))?;

  info!("done");
  Ok(())
}
