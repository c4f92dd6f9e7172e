//! Wires fetching, extraction, assembly and persistence together.
//!
//! Every `(game, page)` pair is its own task. Tasks submit fragments to the
//! shared [`Assembler`]; the task that completes a game sends the record over
//! a channel to the single loop that owns the database connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rusqlite::Connection;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::assembler::Assembler;
use crate::db;
use crate::fetch::PageFetcher;
use crate::model::{CompletedRecord, GameId};
use crate::parser::{extract_page, BoxScoreParser, PageKind};
use crate::persist::persist;
use crate::settings::Settings;
use crate::sink::JsonlSink;

/// End-of-run accounting.
#[derive(Debug, Default)]
pub struct RunReport {
    pub attempted: usize,
    pub completed: usize,
    pub persisted: usize,
    /// Completed games whose transaction was rolled back.
    pub failed: usize,
    /// Games already in the store.
    pub skipped: usize,
    pub fetch_errors: usize,
    pub extract_errors: usize,
    pub duplicates: usize,
    /// Fragments refused: late for a closed game, or filed under the wrong id.
    pub rejected: usize,
    pub pending: Vec<GameId>,
    pub expired: Vec<GameId>,
}

impl RunReport {
    pub fn print(&self) {
        println!(
            "Attempted {} games: {} completed, {} persisted, {} failed, {} skipped.",
            self.attempted, self.completed, self.persisted, self.failed, self.skipped,
        );
        println!(
            "Errors: {} fetch, {} extract. Fragments: {} duplicate, {} late.",
            self.fetch_errors, self.extract_errors, self.duplicates, self.rejected,
        );
        if !self.pending.is_empty() {
            println!("Pending ({}): {}", self.pending.len(), self.pending.iter().join(", "));
        }
        if !self.expired.is_empty() {
            println!("Expired ({}): {}", self.expired.len(), self.expired.iter().join(", "));
        }
    }

    fn absorb_assembly(&mut self, assembler: &Assembler) {
        let a = assembler.report();
        self.attempted = a.attempted;
        self.completed = a.completed;
        self.duplicates = a.duplicates;
        self.rejected = a.rejected;
        self.pending = a.pending;
        self.expired = a.expired;
        for id in &self.pending {
            warn!(game_id = %id, missing = ?assembler.missing(id), "game left incomplete");
        }
    }
}

enum Outcome {
    Completed(CompletedRecord),
    FetchFailed,
    ExtractFailed,
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Appends one record to the audit log, then persists it. The log line is
/// written whether or not the transaction commits. Failures are counted and
/// logged; the record is not retried.
fn store(
    conn: &Connection,
    sink: &mut Option<&mut JsonlSink>,
    record: &CompletedRecord,
    report: &mut RunReport,
) {
    let game_id = record.game_id();
    if let Some(sink) = sink.as_deref_mut() {
        if let Err(e) = sink.append(record) {
            warn!(%game_id, error = %format!("{e:#}"), "audit log write failed");
        }
    }
    match persist(conn, record) {
        Ok(_) => report.persisted += 1,
        Err(e) => {
            report.failed += 1;
            warn!(%game_id, error = %format!("{e:#}"), "game rolled back");
        }
    }
}

/// Fetches every page of every game, assembles and persists the records.
pub async fn run<F: PageFetcher>(
    conn: &Connection,
    fetcher: Arc<F>,
    parser: Arc<dyn BoxScoreParser>,
    games: Vec<GameId>,
    settings: &Settings,
    mut sink: Option<&mut JsonlSink>,
) -> Result<RunReport> {
    let assembler = Arc::new(Assembler::new());
    let semaphore = Arc::new(Semaphore::new(settings.concurrency));
    let pages = parser.pages();
    let pb = progress_bar(games.len())?;

    let (tx, mut rx) = mpsc::channel::<Outcome>(settings.concurrency * 2);

    for game_id in &games {
        assembler.mark_attempted(game_id);
        for &page in &pages {
            let fetcher = Arc::clone(&fetcher);
            let parser = Arc::clone(&parser);
            let assembler = Arc::clone(&assembler);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let game_id = game_id.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let url = parser.page_url(&game_id, page);
                let body = match fetcher.fetch(&url).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(%game_id, %page, error = %e, "fetch failed");
                        let _ = tx.send(Outcome::FetchFailed).await;
                        return;
                    }
                };
                for outcome in handle_page(parser.as_ref(), &assembler, &game_id, page, &body) {
                    let _ = tx.send(outcome).await;
                }
            });
        }
    }

    // rx closes once every task has dropped its sender
    drop(tx);

    let timeout = Duration::from_secs(settings.pending_timeout_secs);
    let mut ticker = tokio::time::interval(timeout.min(Duration::from_secs(30)));
    let mut report = RunReport::default();

    loop {
        tokio::select! {
            outcome = rx.recv() => match outcome {
                Some(Outcome::Completed(record)) => {
                    store(conn, &mut sink, &record, &mut report);
                    pb.inc(1);
                }
                Some(Outcome::FetchFailed) => report.fetch_errors += 1,
                Some(Outcome::ExtractFailed) => report.extract_errors += 1,
                None => break,
            },
            _ = ticker.tick() => {
                let expired = assembler.expire(timeout);
                pb.inc(expired.len() as u64);
            }
        }
    }

    pb.finish_and_clear();
    report.absorb_assembly(&assembler);
    info!(
        games = games.len(),
        persisted = report.persisted,
        pending = report.pending.len(),
        "run finished"
    );
    Ok(report)
}

/// Runs the extractors for one page body and submits what they produce.
/// The parsed document is dropped before this returns.
fn handle_page(
    parser: &dyn BoxScoreParser,
    assembler: &Assembler,
    game_id: &GameId,
    page: PageKind,
    body: &str,
) -> Vec<Outcome> {
    extract_page(parser, page, body, game_id)
        .into_iter()
        .filter_map(|(kind, result)| match result {
            Ok(fragment) => assembler.submit(game_id, fragment).map(Outcome::Completed),
            Err(e) => {
                warn!(%game_id, %page, %kind, error = %e, "extraction failed");
                Some(Outcome::ExtractFailed)
            }
        })
        .collect()
}

// ── Offline import ──

/// A saved page named `<game_id>.<page>.html`.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPage {
    pub game_id: GameId,
    pub page: PageKind,
    pub path: PathBuf,
}

impl SavedPage {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.strip_suffix(".html")?;
        let (game_id, page) = name.rsplit_once('.')?;
        if game_id.is_empty() {
            return None;
        }
        Some(SavedPage {
            game_id: GameId::new(game_id),
            page: PageKind::from_name(page)?,
            path: path.to_path_buf(),
        })
    }
}

pub fn saved_pages(dir: &Path, parser: &dyn BoxScoreParser) -> Result<Vec<SavedPage>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        match SavedPage::from_path(&path) {
            Some(p) if !parser.kinds_on(p.page).is_empty() => pages.push(p),
            _ => debug!(?path, "not a page for this source"),
        }
    }
    pages.sort_by(|a, b| (&a.game_id, a.page.as_str()).cmp(&(&b.game_id, b.page.as_str())));
    Ok(pages)
}

struct FileOutcome {
    completed: Vec<CompletedRecord>,
    extract_errors: usize,
    read_error: bool,
}

fn import_one(parser: &dyn BoxScoreParser, assembler: &Assembler, page: &SavedPage) -> FileOutcome {
    let body = match std::fs::read_to_string(&page.path) {
        Ok(body) => body,
        Err(e) => {
            warn!(path = ?page.path, error = %e, "unreadable page");
            return FileOutcome {
                completed: Vec::new(),
                extract_errors: 0,
                read_error: true,
            };
        }
    };
    let mut out = FileOutcome {
        completed: Vec::new(),
        extract_errors: 0,
        read_error: false,
    };
    for outcome in handle_page(parser, assembler, &page.game_id, page.page, &body) {
        match outcome {
            Outcome::Completed(record) => out.completed.push(record),
            Outcome::ExtractFailed => out.extract_errors += 1,
            Outcome::FetchFailed => out.read_error = true,
        }
    }
    out
}

#[cfg(feature = "rayon")]
fn import_all(
    parser: &dyn BoxScoreParser,
    assembler: &Assembler,
    pages: &[SavedPage],
    pb: &ProgressBar,
) -> Vec<FileOutcome> {
    use rayon::prelude::*;

    pages
        .par_iter()
        .map(|p| {
            let out = import_one(parser, assembler, p);
            pb.inc(1);
            out
        })
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn import_all(
    parser: &dyn BoxScoreParser,
    assembler: &Assembler,
    pages: &[SavedPage],
    pb: &ProgressBar,
) -> Vec<FileOutcome> {
    pages
        .iter()
        .map(|p| {
            let out = import_one(parser, assembler, p);
            pb.inc(1);
            out
        })
        .collect()
}

/// Parses saved pages in parallel, then persists whatever completed.
pub fn import(
    conn: &Connection,
    parser: &dyn BoxScoreParser,
    pages: &[SavedPage],
    mut sink: Option<&mut JsonlSink>,
) -> Result<RunReport> {
    let assembler = Assembler::new();
    let mut report = RunReport::default();

    let known = db::known_game_ids(conn, parser.source())?;
    let (stored, pages): (Vec<&SavedPage>, Vec<&SavedPage>) =
        pages.iter().partition(|p| known.contains(&p.game_id));
    report.skipped = stored.iter().map(|p| &p.game_id).unique().count();
    let pages = pages.into_iter().cloned().collect_vec();

    for p in &pages {
        assembler.mark_attempted(&p.game_id);
    }

    let pb = progress_bar(pages.len())?;
    let outcomes = import_all(parser, &assembler, &pages, &pb);
    pb.finish_and_clear();

    for out in outcomes {
        report.extract_errors += out.extract_errors;
        if out.read_error {
            report.fetch_errors += 1;
        }
        for record in &out.completed {
            store(conn, &mut sink, record, &mut report);
        }
    }

    report.absorb_assembly(&assembler);
    Ok(report)
}

/// Persists records from an audit log. Games already stored are skipped.
pub fn replay(conn: &Connection, records: &[CompletedRecord]) -> Result<RunReport> {
    let mut report = RunReport::default();
    let mut sink = None;
    for record in records {
        report.attempted += 1;
        if db::game_exists(conn, record.game_id())? {
            report.skipped += 1;
            continue;
        }
        report.completed += 1;
        store(conn, &mut sink, record, &mut report);
    }
    Ok(report)
}
