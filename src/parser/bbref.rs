//! basketball-reference dialect. Every fragment comes from the single
//! boxscore page. The four-factor and line-score tables ship inside HTML
//! comments and are re-parsed from the comment text.

use std::collections::HashMap;
use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::debug;

use super::fields::{
    is_overtime_label, FieldMap, Stat, StatSheet, BBREF_ADVANCED, BBREF_BASIC,
    BBREF_FOUR_FACTOR, BBREF_LINE_SCORE,
};
use super::text::{parse_bbref_date, parse_count, parse_record};
use super::{comment_text, pre_game_records, selector, text_of, BoxScoreParser, PageKind, Source};
use crate::error::ExtractError;
use crate::model::{
    FragmentKind, Game, GameId, Player, PlayerStats, PlayerStatsPair, Record, Team,
    TeamStatsPair,
};

const BASE_URL: &str = "https://www.basketball-reference.com";

static TEAM_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/teams/([A-Z]{3})/").unwrap());
static PLAYER_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/players/[a-z]/([a-z0-9]+)\.html").unwrap());
static RECORD_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}-\d{1,3}$").unwrap());

pub struct BbrefParser;

impl BoxScoreParser for BbrefParser {
    fn source(&self) -> Source {
        Source::Bbref
    }

    fn page_for(&self, _kind: FragmentKind) -> PageKind {
        PageKind::Boxscore
    }

    fn page_url(&self, game_id: &GameId, _page: PageKind) -> String {
        format!("{BASE_URL}/boxscores/{game_id}.html")
    }

    fn extract_game(&self, page: &Html, game_id: &GameId) -> Result<Game, ExtractError> {
        let (away, home) = scorebox(page)?;

        let away_score = score(away)?;
        let home_score = score(home)?;
        let (home_record, away_record) = pre_game_records(
            game_id,
            season_record(home)?,
            season_record(away)?,
            home_score,
            away_score,
        );

        let date = page
            .select(&selector("div.scorebox_meta")?)
            .next()
            .and_then(|meta| parse_bbref_date(&text_of(meta)));

        // Venue splits and betting lines are not published here.
        Ok(Game {
            game_id: game_id.clone(),
            source: Source::Bbref,
            date,
            home_score,
            away_score,
            home_record,
            away_record,
            home_home_record: Record::default(),
            away_away_record: Record::default(),
            line: Default::default(),
        })
    }

    fn extract_team_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<TeamStatsPair, ExtractError> {
        let (away, home) = scorebox(page)?;
        let away_team = team_identity(away)?;
        let home_team = team_identity(home)?;

        let away_sheet = team_sheet(page, &away_team.abbreviation)?;
        let home_sheet = team_sheet(page, &home_team.abbreviation)?;

        Ok(TeamStatsPair {
            home: home_sheet.team_stats(game_id, home_team, true),
            away: away_sheet.team_stats(game_id, away_team, false),
        })
    }

    fn extract_player_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<PlayerStatsPair, ExtractError> {
        let (away, home) = scorebox(page)?;
        let away_team = team_identity(away)?;
        let home_team = team_identity(home)?;

        Ok(PlayerStatsPair {
            home: team_players(page, &home_team.abbreviation, game_id, true)?,
            away: team_players(page, &away_team.abbreviation, game_id, false)?,
        })
    }
}

/// The two team blocks of the scorebox, away first.
fn scorebox(page: &Html) -> Result<(ElementRef<'_>, ElementRef<'_>), ExtractError> {
    let block_sel = selector("div.scorebox > div")?;
    let name_sel = selector("strong a[itemprop=name]")?;
    page.select(&block_sel)
        .filter(|block| block.select(&name_sel).next().is_some())
        .take(2)
        .collect_tuple()
        .ok_or(ExtractError::MissingElement("div.scorebox team blocks"))
}

fn team_identity(block: ElementRef<'_>) -> Result<Team, ExtractError> {
    let link = block
        .select(&selector("strong a[itemprop=name]")?)
        .next()
        .ok_or(ExtractError::MissingElement("a[itemprop=name]"))?;
    let href = link.value().attr("href").unwrap_or_default();
    let abbreviation = TEAM_HREF_RE
        .captures(href)
        .map(|c| c[1].to_string())
        .ok_or_else(|| ExtractError::MalformedTeam(href.to_string()))?;
    Ok(Team {
        location: None,
        name: text_of(link),
        abbreviation,
    })
}

fn score(block: ElementRef<'_>) -> Result<Option<u32>, ExtractError> {
    Ok(block
        .select(&selector("div.scores div.score")?)
        .next()
        .and_then(|el| parse_count(&text_of(el))))
}

/// The record sits in its own child `<div>` with nothing else in it.
fn season_record(block: ElementRef<'_>) -> Result<Record, ExtractError> {
    let cell = block
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "div")
        .map(text_of)
        .find(|text| RECORD_CELL_RE.is_match(text))
        .unwrap_or_default();
    parse_record(&cell)
}

fn team_sheet(page: &Html, abbreviation: &str) -> Result<StatSheet, ExtractError> {
    let mut sheet = StatSheet::new();

    for (suffix, map) in [("basic", &BBREF_BASIC), ("advanced", &BBREF_ADVANCED)] {
        let css = format!("table#box-{abbreviation}-game-{suffix} tfoot td[data-stat]");
        for cell in page.select(&selector(&css)?) {
            if let Some(label) = cell.value().attr("data-stat") {
                sheet.record(map, label, &text_of(cell));
            }
        }
    }

    for (label, raw) in commented_row(page, "div#all_four_factors", abbreviation)? {
        sheet.record(&BBREF_FOUR_FACTOR, &label, &raw);
    }

    for (label, raw) in commented_row(page, "div#all_line_score", abbreviation)? {
        if is_overtime_label(&label) {
            sheet.add(Stat::OvertimePoints, parse_count(&raw).unwrap_or(0) as f64);
        } else {
            sheet.record(&BBREF_LINE_SCORE, &label, &raw);
        }
    }

    Ok(sheet)
}

/// `(data-stat, text)` cells of the row labelled `abbreviation` in a table
/// that may be shipped inside an HTML comment under `wrapper`.
fn commented_row(
    page: &Html,
    wrapper: &'static str,
    abbreviation: &str,
) -> Result<Vec<(String, String)>, ExtractError> {
    let Some(wrap) = page.select(&selector(wrapper)?).next() else {
        debug!(wrapper, "table wrapper not found");
        return Ok(Vec::new());
    };
    let markup = format!("{}\n{}", wrap.inner_html(), comment_text(wrap));
    let table = Html::parse_fragment(&markup);

    let row_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td[data-stat]")?;

    let Some(row) = table
        .select(&row_sel)
        .find(|row| row.select(&th_sel).any(|th| text_of(th) == abbreviation))
    else {
        debug!(wrapper, abbreviation, "no row for team");
        return Ok(Vec::new());
    };

    Ok(row
        .select(&td_sel)
        .filter_map(|td| {
            td.value()
                .attr("data-stat")
                .map(|label| (label.to_string(), text_of(td)))
        })
        .collect())
}

struct PlayerRow {
    player: Player,
    dnp: bool,
    sheet: StatSheet,
}

fn team_players(
    page: &Html,
    abbreviation: &str,
    game_id: &GameId,
    home: bool,
) -> Result<Vec<PlayerStats>, ExtractError> {
    let basic = player_rows(page, &format!("box-{abbreviation}-game-basic"), &BBREF_BASIC)?;
    let mut advanced: HashMap<String, StatSheet> =
        player_rows(page, &format!("box-{abbreviation}-game-advanced"), &BBREF_ADVANCED)?
            .into_iter()
            .map(|row| (row.player.player_id, row.sheet))
            .collect();

    Ok(basic
        .into_iter()
        .map(|mut row| {
            if let Some(extra) = advanced.remove(&row.player.player_id) {
                row.sheet.merge(extra);
            }
            row.sheet.player_stats(game_id, row.player, home, row.dnp)
        })
        .collect())
}

fn player_rows(page: &Html, table_id: &str, map: &FieldMap) -> Result<Vec<PlayerRow>, ExtractError> {
    let row_sel = selector(&format!("table#{table_id} tbody tr"))?;
    let player_sel = selector("th[data-stat=player]")?;
    let reason_sel = selector("td[data-stat=reason]")?;
    let td_sel = selector("td[data-stat]")?;

    let mut rows = Vec::new();
    for row in page.select(&row_sel) {
        if row.value().classes().any(|c| c == "thead") {
            continue;
        }
        let Some(player) = row.select(&player_sel).next().and_then(player_identity) else {
            continue;
        };

        let dnp = row.select(&reason_sel).next().is_some();
        let mut sheet = StatSheet::new();
        if !dnp {
            for cell in row.select(&td_sel) {
                if let Some(label) = cell.value().attr("data-stat") {
                    sheet.record(map, label, &text_of(cell));
                }
            }
        }
        rows.push(PlayerRow { player, dnp, sheet });
    }

    if rows.is_empty() {
        debug!(table_id, "no player rows");
    }
    Ok(rows)
}

/// Player id from `data-append-csv`, falling back to the profile link.
fn player_identity(cell: ElementRef<'_>) -> Option<Player> {
    let link = cell
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a")?;
    let player_id = cell
        .value()
        .attr("data-append-csv")
        .map(str::to_string)
        .or_else(|| {
            let href = link.value().attr("href")?;
            PLAYER_HREF_RE.captures(href).map(|c| c[1].to_string())
        })?;

    let name = text_of(link);
    let (first, last) = name.split_once(' ').unwrap_or((name.as_str(), ""));
    Some(Player {
        player_id,
        first_name: first.to_string(),
        last_name: last.trim().to_string(),
        position: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract_page;
    use chrono::{Datelike, Timelike};

    fn page() -> Html {
        Html::parse_document(&std::fs::read_to_string("tests/fixtures/bbref_boxscore.html").unwrap())
    }

    fn gid() -> GameId {
        GameId::from("200601010NJN")
    }

    #[test]
    fn game_from_scorebox() {
        let game = BbrefParser.extract_game(&page(), &gid()).unwrap();
        assert_eq!(game.source, Source::Bbref);
        assert_eq!(game.away_score, Some(95));
        assert_eq!(game.home_score, Some(102));
        assert_eq!(game.home_record, Record::new(15, 13));
        assert_eq!(game.away_record, Record::new(12, 17));
        assert_eq!(game.home_home_record, Record::default());
        assert!(game.line.favorite.is_none() && game.line.over_under.is_none());

        let date = game.date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2006, 1, 1));
        assert_eq!(date.hour(), 19);
    }

    #[test]
    fn coach_record_is_not_the_team_record() {
        let body = std::fs::read_to_string("tests/fixtures/bbref_boxscore.html")
            .unwrap()
            .replace("<div>12-17</div>", "");
        let err = BbrefParser
            .extract_game(&Html::parse_document(&body), &gid())
            .unwrap_err();
        assert!(matches!(err, ExtractError::MalformedRecord(_)));
    }

    #[test]
    fn team_totals_and_commented_tables() {
        let pair = BbrefParser.extract_team_stats(&page(), &gid()).unwrap();

        let home = &pair.home;
        assert_eq!(home.team.abbreviation, "NJN");
        assert_eq!(home.team.name, "New Jersey Nets");
        assert!(home.team.location.is_none());
        assert_eq!((home.line.fg.made, home.line.fg.attempted), (38, 84));
        assert_eq!(home.line.reb, 48);
        assert_eq!(home.line.pts, 102);
        assert_eq!(home.pace, Some(93.2));
        assert_eq!(home.ft_per_fga, Some(0.265));
        assert_eq!(home.advanced.ts_pct, Some(0.539));
        assert_eq!(home.advanced.usg_pct, None);
        assert_eq!((home.q1_pts, home.q2_pts, home.q3_pts, home.q4_pts), (20, 25, 17, 20));
        assert_eq!(home.ot_pts, 20);

        let away = &pair.away;
        assert_eq!(away.team.abbreviation, "POR");
        assert!(!away.home);
        assert_eq!(away.ot_pts, 13);
        assert_eq!(away.advanced.off_rating, Some(92.1));
        // Matchup-only counts are not reported here.
        assert_eq!(away.fast_break_pts, 0);
    }

    #[test]
    fn players_with_advanced_merged() {
        let pair = BbrefParser.extract_player_stats(&page(), &gid()).unwrap();
        assert_eq!(pair.away.len(), 3);
        assert_eq!(pair.home.len(), 2);

        let randolph = &pair.away[0];
        assert_eq!(randolph.player.player_id, "randoza01");
        assert_eq!(randolph.player.first_name, "Zach");
        assert_eq!(randolph.player.last_name, "Randolph");
        assert_eq!(randolph.minutes, 44);
        assert_eq!(randolph.line.reb, 13);
        assert_eq!(randolph.advanced.ts_pct, Some(0.535));
        assert_eq!(randolph.advanced.off_rating, Some(104.0));

        let telfair = &pair.away[1];
        assert_eq!(telfair.line.ft.attempted, 0);
        assert_eq!(telfair.line.ft.pct, 0.0);
        assert_eq!(telfair.advanced.oreb_pct, None);

        let kidd = &pair.home[1];
        assert!(kidd.home);
        assert_eq!(kidd.line.ast, 12);
        assert_eq!(kidd.advanced.ast_pct, Some(35.3));
    }

    #[test]
    fn did_not_play_row_is_kept() {
        let pair = BbrefParser.extract_player_stats(&page(), &gid()).unwrap();
        let ratliff = pair
            .away
            .iter()
            .find(|p| p.player.player_id == "ratlith01")
            .unwrap();
        assert!(ratliff.dnp);
        assert_eq!(ratliff.player.last_name, "Ratliff");
        assert_eq!(ratliff.minutes, 0);
        assert_eq!(ratliff.line, Default::default());
        assert_eq!(ratliff.advanced, Default::default());
    }

    #[test]
    fn one_page_yields_all_fragments() {
        let body = std::fs::read_to_string("tests/fixtures/bbref_boxscore.html").unwrap();
        let out = extract_page(&BbrefParser, PageKind::Boxscore, &body, &gid());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn player_id_from_link() {
        let doc = Html::parse_fragment(
            r#"<table><tr><th data-stat="player"><a href="/players/j/jamesle01.html">LeBron James</a></th></tr></table>"#,
        );
        let cell = doc.select(&selector("th").unwrap()).next().unwrap();
        let p = player_identity(cell).unwrap();
        assert_eq!(p.player_id, "jamesle01");
        assert_eq!(p.first_name, "LeBron");
    }

    #[test]
    fn url() {
        assert_eq!(
            BbrefParser.page_url(&gid(), PageKind::Boxscore),
            "https://www.basketball-reference.com/boxscores/200601010NJN.html"
        );
    }
}
