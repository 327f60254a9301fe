//! `minidb`: a line-oriented shell over a single database file.

use anyhow::{Context, Result};
use clap::Parser;
use minidb_sql::{Response, Session};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod settings;

use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "minidb", version, about = "Interactive shell for minidb databases")]
struct Cli {
    /// Database file to open on startup
    #[arg(value_name = "FILE")]
    database: Option<PathBuf>,

    /// Settings file; missing is fine
    #[arg(long, short = 'c', value_name = "FILE", default_value = "minidb.toml")]
    config: PathBuf,

    /// Log filter, e.g. "debug" or "storage=trace"
    #[arg(long, env = "MINIDB_LOG_LEVEL")]
    log_level: Option<String>,

    /// Only flush on .flush and on exit
    #[arg(long)]
    no_auto_flush: bool,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level: {}", level))?;
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;
    if let Some(path) = cli.database {
        settings.database = Some(path);
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if cli.no_auto_flush {
        settings.auto_flush = false;
    }

    init_logging(&settings.log_level)?;
    tracing::debug!(?settings, "starting minidb");

    let mut session = Session::new().with_auto_flush(settings.auto_flush);
    if let Some(path) = &settings.database {
        open_database(&mut session, path)?;
    }

    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    if interactive {
        println!("minidb {}", env!("CARGO_PKG_VERSION"));
    }

    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            print!("{}", settings.prompt);
            stdout.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read input")?;

        match session.handle_line(&line) {
            Ok(Response::Output(text)) => {
                print!("{}", text);
                stdout.flush()?;
            }
            Ok(Response::Quit) => break,
            Err(e) => {
                tracing::debug!(error = %e, line = %line, "statement failed");
                println!("Error: {}", e);
            }
        }
    }

    session.close().context("failed to flush database on exit")?;
    Ok(())
}

fn open_database(session: &mut Session, path: &Path) -> Result<()> {
    session
        .open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(())
}
