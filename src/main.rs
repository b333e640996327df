use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sqlite_carve::{RecoveredRow, RecoveryConfig};
use tracing_subscriber::EnvFilter;

/// Recover live and deleted records from a SQLite database and its WAL / rollback journal.
#[derive(Parser, Debug)]
#[command(name = "sqlite-carve")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Database file to recover from
  db: PathBuf,

  /// WAL file, instead of `<db>-wal`
  #[arg(long)]
  wal: Option<PathBuf>,

  /// Rollback journal, instead of `<db>-journal`
  #[arg(long)]
  rjournal: Option<PathBuf>,

  /// Worker threads
  #[arg(long)]
  threads: Option<usize>,

  /// Only decode cells reachable from cell pointers
  #[arg(long)]
  no_carve: bool,

  /// More logging (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

/// `--wal:<path>` and `--rjournal:<path>` become `--wal=<path>` and `--rjournal=<path>`.
fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
  args
    .into_iter()
    .map(|arg| {
      for flag in ["--wal:", "--rjournal:"] {
        if let Some(path) = arg.strip_prefix(flag) {
          return format!("{}={path}", &flag[..flag.len() - 1]);
        }
      }
      arg
    })
    .collect()
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn print_tables(
  out: &mut impl Write,
  source: &str,
  tables: &BTreeMap<String, Vec<RecoveredRow>>,
) -> io::Result<()> {
  for (table, rows) in tables {
    writeln!(out, "## {source} {table} ({} rows)", rows.len())?;
    for row in rows {
      writeln!(out, "{}", row.to_strings().join("\t"))?;
    }
    writeln!(out)?;
  }
  Ok(())
}

fn main() -> Result<()> {
  let cli = Cli::parse_from(normalize_args(std::env::args()));
  init_logging(cli.verbose);

  let mut config = RecoveryConfig::default().with_carving(!cli.no_carve);
  if let Some(threads) = cli.threads {
    config = config.with_threads(threads);
  }
  if let Some(wal) = cli.wal {
    config = config.with_wal(wal);
  }
  if let Some(journal) = cli.rjournal {
    config = config.with_journal(journal);
  }

  let report = sqlite_carve::start(&cli.db, config)
    .with_context(|| format!("cannot recover {}", cli.db.display()))?;

  let mut out = BufWriter::new(io::stdout().lock());
  print_tables(&mut out, "db", &report.tables)?;
  print_tables(&mut out, "wal", &report.wal_tables)?;
  print_tables(&mut out, "journal", &report.journal_tables)?;
  out.flush()?;
  Ok(())
}
