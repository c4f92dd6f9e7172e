//! Finds game ids by reading one scoreboard page per date.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::fetch::PageFetcher;
use crate::model::GameId;
use crate::parser::Source;

static ESPN_GAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gameId[=/](\d+)").unwrap());
static BBREF_GAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/boxscores/(\d{9}[A-Z]{3})\.html").unwrap());

pub fn scoreboard_url(source: Source, date: NaiveDate) -> String {
    match source {
        Source::Espn => format!(
            "https://www.espn.com/nba/scoreboard/_/date/{}",
            date.format("%Y%m%d")
        ),
        Source::Bbref => format!(
            "https://www.basketball-reference.com/boxscores/?month={}&day={}&year={}",
            date.month(),
            date.day(),
            date.year()
        ),
    }
}

/// Game ids linked from a scoreboard page, first occurrence order.
pub fn game_ids(source: Source, body: &str) -> Vec<GameId> {
    let re = match source {
        Source::Espn => &*ESPN_GAME_RE,
        Source::Bbref => &*BBREF_GAME_RE,
    };
    re.captures_iter(body)
        .map(|c| GameId::new(&c[1]))
        .unique()
        .collect()
}

/// Every date from `from` to `to`, both included.
pub fn dates(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days().take_while(|d| *d <= to).collect()
}

/// Fetches the scoreboard for each date and collects the ids. A date whose
/// scoreboard cannot be fetched is logged and skipped.
pub async fn discover<F: PageFetcher>(
    fetcher: &F,
    source: Source,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<GameId> {
    let mut ids = Vec::new();
    for date in dates(from, to) {
        let url = scoreboard_url(source, date);
        match fetcher.fetch(&url).await {
            Ok(body) => {
                let found = game_ids(source, &body);
                debug!(%date, games = found.len(), "scoreboard read");
                ids.extend(found);
            }
            Err(e) => warn!(%date, error = %e, "scoreboard unavailable"),
        }
    }
    let ids = ids.into_iter().unique().collect_vec();
    info!(%source, %from, %to, games = ids.len(), "discovery finished");
    ids
}
