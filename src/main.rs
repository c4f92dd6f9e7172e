mod assembler;
mod db;
mod discovery;
mod error;
mod fetch;
mod model;
mod parser;
mod persist;
mod pipeline;
mod settings;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use rusqlite::Connection;

use crate::fetch::HttpFetcher;
use crate::model::{Fragment, FragmentKind, GameId};
use crate::parser::{parser_for, Source};
use crate::settings::Settings;
use crate::sink::JsonlSink;

#[derive(Parser)]
#[command(
    name = "boxscore_etl",
    about = "NBA box scores from ESPN and basketball-reference into SQLite"
)]
struct Cli {
    /// SQLite database path (overrides settings)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Also append every completed game to this JSONL file
    #[arg(long, global = true)]
    jsonl: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Fetch, parse and store games
    Run {
        #[arg(short, long, value_enum)]
        source: Source,
        /// Game ids to fetch
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// First scoreboard date to discover games on (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last scoreboard date, inclusive (default: --from)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        /// Max games to fetch (default: all not yet stored)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Parse one saved page and print the fragment as JSON
    Parse {
        #[arg(short, long, value_enum)]
        source: Source,
        #[arg(short, long, value_enum)]
        kind: FragmentKind,
        file: PathBuf,
        /// Defaults to the file name up to the first '.'
        #[arg(long)]
        game_id: Option<String>,
    },
    /// Parse saved pages named <game_id>.<page>.html and store the games
    Import {
        #[arg(short, long, value_enum)]
        source: Source,
        dir: PathBuf,
    },
    /// Store games from a JSONL audit log
    Replay { file: PathBuf },
    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let Cli { db, jsonl, command } = Cli::parse();

    let result = match command {
        Commands::Init => {
            let settings = load_settings(db, jsonl)?;
            open_db(&settings)?;
            println!("Schema ready in {:?}", settings.db_path);
            Ok(())
        }
        Commands::Run {
            source,
            ids,
            from,
            to,
            limit,
        } => {
            let settings = load_settings(db, jsonl)?;
            let conn = open_db(&settings)?;
            let fetcher = Arc::new(HttpFetcher::new(&settings)?);

            let mut games = ids.into_iter().map(GameId::new).collect_vec();
            if let Some(from) = from {
                let to = to.unwrap_or(from);
                if to < from {
                    bail!("--to {to} is before --from {from}");
                }
                games.extend(discovery::discover(fetcher.as_ref(), source, from, to).await);
            }
            let mut games = games.into_iter().unique().collect_vec();
            if games.is_empty() {
                println!("No games to fetch. Pass --ids or --from/--to.");
                return Ok(());
            }

            let known = db::known_game_ids(&conn, source)?;
            let total = games.len();
            games.retain(|g| !known.contains(g));
            let skipped = total - games.len();
            if let Some(n) = limit {
                games.truncate(n);
            }
            if games.is_empty() {
                println!("All {} games already stored.", total);
                return Ok(());
            }

            println!("Fetching {} {} games ({} already stored)...", games.len(), source, skipped);
            let mut sink = open_sink(&settings)?;
            let mut report = pipeline::run(
                &conn,
                fetcher,
                parser_for(source),
                games,
                &settings,
                sink.as_mut(),
            )
            .await?;
            report.skipped = skipped;
            report.print();
            print_sink(&settings, sink.as_ref());
            Ok(())
        }
        Commands::Parse {
            source,
            kind,
            file,
            game_id,
        } => {
            let game_id = match game_id {
                Some(id) => GameId::new(id),
                None => game_id_from_file(&file)?,
            };
            let fragment = parse_file(source, kind, &file, &game_id)?;
            println!("{}", serde_json::to_string_pretty(&fragment)?);
            Ok(())
        }
        Commands::Import { source, dir } => {
            let settings = load_settings(db, jsonl)?;
            let conn = open_db(&settings)?;
            let parser = parser_for(source);
            let pages = pipeline::saved_pages(&dir, parser.as_ref())?;
            if pages.is_empty() {
                println!("No {} pages in {:?}.", source, dir);
                return Ok(());
            }
            println!("Importing {} pages...", pages.len());
            let mut sink = open_sink(&settings)?;
            let report = pipeline::import(&conn, parser.as_ref(), &pages, sink.as_mut())?;
            report.print();
            print_sink(&settings, sink.as_ref());
            Ok(())
        }
        Commands::Replay { file } => {
            let settings = load_settings(db, jsonl)?;
            let conn = open_db(&settings)?;
            let records = sink::read_records(&file)?;
            println!("Replaying {} records...", records.len());
            let report = pipeline::replay(&conn, &records)?;
            report.print();
            Ok(())
        }
        Commands::Stats => {
            let settings = load_settings(db, jsonl)?;
            let conn = open_db(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Teams:        {}", s.teams);
            println!("Players:      {}", s.players);
            println!("Games:        {}", s.games);
            println!("Team stats:   {}", s.team_stats);
            println!("Player stats: {} ({} DNP)", s.player_stats, s.dnp);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_settings(db: Option<PathBuf>, jsonl: Option<PathBuf>) -> anyhow::Result<Settings> {
    let mut settings = Settings::load()?;
    if let Some(path) = db {
        settings.db_path = path;
    }
    if jsonl.is_some() {
        settings.jsonl_path = jsonl;
    }
    Ok(settings)
}

fn open_db(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn open_sink(settings: &Settings) -> anyhow::Result<Option<JsonlSink>> {
    settings.jsonl_path.as_deref().map(JsonlSink::open).transpose()
}

fn print_sink(settings: &Settings, sink: Option<&JsonlSink>) {
    if let (Some(path), Some(sink)) = (&settings.jsonl_path, sink) {
        println!("Appended {} records to {:?}", sink.written(), path);
    }
}

fn game_id_from_file(file: &Path) -> anyhow::Result<GameId> {
    file.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|id| !id.is_empty())
        .map(GameId::new)
        .with_context(|| format!("cannot infer a game id from {:?}; pass --game-id", file))
}

fn parse_file(
    source: Source,
    kind: FragmentKind,
    file: &Path,
    game_id: &GameId,
) -> anyhow::Result<Fragment> {
    let body =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let doc = scraper::Html::parse_document(&body);
    let fragment = parser_for(source)
        .extract(kind, &doc, game_id)
        .with_context(|| format!("{kind} from {:?}", file))?;
    Ok(fragment)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
