use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tally_shared::{Priority, SortField, SortOrder};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally",
    version,
    about = "Tally: todo and category client",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "tallyrc")]
    pub tallyrc: Option<PathBuf>,

    /// Snapshot directory for the local backend.
    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List todos (the default command).
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        completed: Option<bool>,
        #[arg(long)]
        page: Option<usize>,
        #[arg(long)]
        sort: Option<SortField>,
        #[arg(long)]
        order: Option<SortOrder>,
    },
    /// Show one todo with its category.
    Show { id: i64 },
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// RFC 3339, YYYY-MM-DD, today, tomorrow or +Nd.
        #[arg(long)]
        due: Option<String>,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        priority: Option<Priority>,
        /// A date expression, or `none` to clear the due date.
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        completed: Option<bool>,
    },
    /// Flip a todo between open and done.
    Toggle { id: i64 },
    Rm { id: i64 },
    Categories,
    CategoryAdd {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    CategoryEdit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    CategoryRm { id: i64 },
}

impl Default for Command {
    fn default() -> Self {
        Command::List {
            search: None,
            category: None,
            priority: None,
            completed: None,
            page: None,
            sort: None,
            order: None,
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "tally",
            "rc.page.size=5",
            "list",
            "rc.backend:local",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["tally", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.page.size".to_string(), "5".to_string()),
                ("rc.backend".to_string(), "local".to_string()),
            ]
        );
    }

    #[test]
    fn parses_subcommands_and_defaults() {
        let cli = GlobalCli::try_parse_from([
            "tally", "-vv", "--rc", "filter.mode=client", "add", "Ship release", "--category", "2",
        ])
        .expect("parse add");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "filter.mode");
        assert_eq!(
            cli.command,
            Some(Command::Add {
                title: "Ship release".to_string(),
                description: None,
                category: Some(2),
                priority: Priority::Medium,
                due: None,
            })
        );

        let bare = GlobalCli::try_parse_from(["tally"]).expect("parse bare");
        assert_eq!(bare.command.unwrap_or_default(), Command::default());

        let list = GlobalCli::try_parse_from([
            "tally", "list", "--priority", "high", "--sort", "due_date", "--order", "asc",
        ])
        .expect("parse list");
        match list.command {
            Some(Command::List {
                priority, sort, order, ..
            }) => {
                assert_eq!(priority, Some(Priority::High));
                assert_eq!(sort, Some(SortField::DueDate));
                assert_eq!(order, Some(SortOrder::Asc));
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(GlobalCli::try_parse_from(["tally", "add", "x", "--priority", "urgent"]).is_err());
    }
}
