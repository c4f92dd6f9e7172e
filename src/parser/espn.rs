//! ESPN dialect. One game is spread over three pages: the gamecast carries
//! the game header, the matchup page the team totals and the boxscore page
//! the per-player lines.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::debug;

use super::fields::{Stat, StatSheet, ESPN_PLAYER, ESPN_PLAYER_SPLITS, ESPN_TEAM, QUARTERS};
use super::text::{
    parse_betting_line, parse_count, parse_espn_date, parse_record, parse_shooting_split,
    parse_team_identity,
};
use super::{own_text, pre_game_records, selector, text_of, BoxScoreParser, PageKind, Source};
use crate::error::ExtractError;
use crate::model::{
    FragmentKind, Game, GameId, Player, PlayerStats, PlayerStatsPair, Record, Team,
    TeamStatsPair,
};

const BASE_URL: &str = "https://www.espn.com/nba";

const AWAY_HEADER: &str = "div.team.away";
const HOME_HEADER: &str = "div.team.home";
const AWAY_BOX: &str = "div.gamepackage-away-wrap";
const HOME_BOX: &str = "div.gamepackage-home-wrap";

static PLAYER_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/id/(\d+)/([a-z0-9.'-]+)").unwrap());

pub struct EspnParser;

impl BoxScoreParser for EspnParser {
    fn source(&self) -> Source {
        Source::Espn
    }

    fn page_for(&self, kind: FragmentKind) -> PageKind {
        match kind {
            FragmentKind::Game => PageKind::Gamecast,
            FragmentKind::TeamStats => PageKind::Matchup,
            FragmentKind::PlayerStats => PageKind::Boxscore,
        }
    }

    fn page_url(&self, game_id: &GameId, page: PageKind) -> String {
        let path = match page {
            PageKind::Gamecast => "game",
            PageKind::Boxscore => "boxscore",
            PageKind::Matchup => "matchup",
        };
        format!("{BASE_URL}/{path}?gameId={game_id}")
    }

    fn extract_game(&self, page: &Html, game_id: &GameId) -> Result<Game, ExtractError> {
        let away = header(page, AWAY_HEADER)?;
        let home = header(page, HOME_HEADER)?;

        let away_score = score(away)?;
        let home_score = score(home)?;

        let (home_record, away_record) = pre_game_records(
            game_id,
            overall_record(home)?,
            overall_record(away)?,
            home_score,
            away_score,
        );
        let (home_home_record, away_away_record) = pre_game_records(
            game_id,
            venue_record(home)?,
            venue_record(away)?,
            home_score,
            away_score,
        );

        let date_sel = selector("div.game-date-time span[data-date]")?;
        let date = page
            .select(&date_sel)
            .next()
            .and_then(|el| el.value().attr("data-date"))
            .and_then(parse_espn_date);

        let odds_sel = selector("div.odds-details li")?;
        let odds: Vec<String> = page.select(&odds_sel).map(text_of).collect();

        Ok(Game {
            game_id: game_id.clone(),
            source: Source::Espn,
            date,
            home_score,
            away_score,
            home_record,
            away_record,
            home_home_record,
            away_away_record,
            line: parse_betting_line(&odds),
        })
    }

    fn extract_team_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<TeamStatsPair, ExtractError> {
        let away_header = header(page, AWAY_HEADER)?;
        let home_header = header(page, HOME_HEADER)?;
        let away_team = team_identity(away_header)?;
        let home_team = team_identity(home_header)?;

        // header scores stand in when the line score is missing
        let mut away = StatSheet::new();
        let mut home = StatSheet::new();
        for (sheet, side) in [(&mut away, away_header), (&mut home, home_header)] {
            if let Some(points) = score(side)? {
                sheet.set(Stat::Points, points as f64);
            }
        }

        let row_sel = selector("tr[data-stat-attr]")?;
        let td_sel = selector("td")?;
        for row in page.select(&row_sel) {
            let Some(attr) = row.value().attr("data-stat-attr") else {
                continue;
            };
            let cells: Vec<ElementRef> = row.select(&td_sel).collect();
            let [_, away_cell, home_cell, ..] = cells.as_slice() else {
                debug!(%game_id, attr, "matchup row without both team cells");
                continue;
            };
            for (sheet, cell) in [(&mut away, away_cell), (&mut home, home_cell)] {
                record_matchup_cell(sheet, attr, &text_of(*cell));
            }
        }

        line_score(page, &away_team.abbreviation, &mut away)?;
        line_score(page, &home_team.abbreviation, &mut home)?;

        Ok(TeamStatsPair {
            home: home.team_stats(game_id, home_team, true),
            away: away.team_stats(game_id, away_team, false),
        })
    }

    fn extract_player_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<PlayerStatsPair, ExtractError> {
        Ok(PlayerStatsPair {
            home: box_side(page, HOME_BOX, game_id, true)?,
            away: box_side(page, AWAY_BOX, game_id, false)?,
        })
    }
}

fn header<'a>(page: &'a Html, css: &'static str) -> Result<ElementRef<'a>, ExtractError> {
    page.select(&selector(css)?)
        .next()
        .ok_or(ExtractError::MissingElement(css))
}

fn team_identity(side: ElementRef<'_>) -> Result<Team, ExtractError> {
    let name = side
        .select(&selector("a.team-name, div.team-name")?)
        .next()
        .ok_or(ExtractError::MissingElement("team-name"))?;
    parse_team_identity(&name.html()).ok_or_else(|| ExtractError::MalformedTeam(text_of(name)))
}

fn score(side: ElementRef<'_>) -> Result<Option<u32>, ExtractError> {
    Ok(side
        .select(&selector("div.score-container")?)
        .next()
        .and_then(|el| parse_count(&text_of(el))))
}

/// The season record is the text directly inside `div.record`; the nested
/// span holds the venue record.
fn overall_record(side: ElementRef<'_>) -> Result<Record, ExtractError> {
    let el = side
        .select(&selector("div.record")?)
        .next()
        .ok_or(ExtractError::MissingElement("div.record"))?;
    parse_record(&own_text(el))
}

fn venue_record(side: ElementRef<'_>) -> Result<Record, ExtractError> {
    Ok(side
        .select(&selector("span.inner-record")?)
        .next()
        .and_then(|el| parse_record(&text_of(el)).ok())
        .unwrap_or_default())
}

fn record_matchup_cell(sheet: &mut StatSheet, attr: &str, raw: &str) {
    match attr.split_once('-') {
        Some((made, attempted)) => {
            let (Some(made), Some(attempted)) = (ESPN_TEAM.get(made), ESPN_TEAM.get(attempted))
            else {
                return;
            };
            if let Some(split) = parse_shooting_split(raw) {
                sheet.record_split(made, attempted, split);
            }
        }
        None => {
            sheet.record(&ESPN_TEAM, attr, raw);
        }
    }
}

/// Quarter and final points from `table#linescore`. Every period past the
/// fourth is overtime.
fn line_score(page: &Html, abbreviation: &str, sheet: &mut StatSheet) -> Result<(), ExtractError> {
    let row_sel = selector("table#linescore tbody tr")?;
    let name_sel = selector("td.team-name")?;
    let td_sel = selector("td")?;

    let row = page.select(&row_sel).find(|row| {
        row.select(&name_sel)
            .next()
            .is_some_and(|el| text_of(el).eq_ignore_ascii_case(abbreviation))
    });
    let Some(row) = row else {
        debug!(abbreviation, "no line score row");
        return Ok(());
    };

    let mut periods = 0usize;
    for cell in row.select(&td_sel) {
        let classes: Vec<&str> = cell.value().classes().collect();
        if classes.contains(&"team-name") {
            continue;
        }
        let value = parse_count(&text_of(cell)).unwrap_or(0) as f64;
        if classes.contains(&"final-score") {
            sheet.set(Stat::Points, value);
            continue;
        }
        match QUARTERS.get(periods) {
            Some(quarter) => sheet.set(*quarter, value),
            None => sheet.add(Stat::OvertimePoints, value),
        }
        periods += 1;
    }
    Ok(())
}

fn box_side(
    page: &Html,
    css: &'static str,
    game_id: &GameId,
    home: bool,
) -> Result<Vec<PlayerStats>, ExtractError> {
    let wrap = page
        .select(&selector(css)?)
        .next()
        .ok_or(ExtractError::MissingElement(css))?;

    let row_sel = selector("tbody tr")?;
    let link_sel = selector("td.name a[href]")?;
    let pos_sel = selector("span.position")?;
    let dnp_sel = selector("td.dnp")?;
    let td_sel = selector("td")?;

    let mut players = Vec::new();
    for row in wrap.select(&row_sel) {
        let Some(href) = row
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(mut player) = player_from_href(href) else {
            debug!(%game_id, href, "unrecognised player link");
            continue;
        };
        player.position = row
            .select(&pos_sel)
            .next()
            .map(text_of)
            .filter(|p| !p.is_empty());

        let dnp = row.select(&dnp_sel).next().is_some() || text_of(row).contains("DNP");
        let mut sheet = StatSheet::new();
        if !dnp {
            for cell in row.select(&td_sel) {
                record_box_cell(&mut sheet, cell);
            }
        }
        players.push(sheet.player_stats(game_id, player, home, dnp));
    }
    Ok(players)
}

fn record_box_cell(sheet: &mut StatSheet, cell: ElementRef<'_>) {
    let raw = text_of(cell);
    for class in cell.value().classes() {
        if let Some((_, made, attempted)) = ESPN_PLAYER_SPLITS.iter().find(|(c, ..)| *c == class) {
            if let Some(split) = parse_shooting_split(&raw) {
                sheet.record_split(*made, *attempted, split);
            }
            return;
        }
        if sheet.record(&ESPN_PLAYER, class, &raw) {
            return;
        }
    }
}

/// `.../player/_/id/6450/kyrie-irving` → id `6450`, "Kyrie" "Irving".
fn player_from_href(href: &str) -> Option<Player> {
    let caps = PLAYER_HREF_RE.captures(href)?;
    let slug = &caps[2];
    let (first, last) = slug.split_once('-').unwrap_or((slug, ""));
    Some(Player {
        player_id: caps[1].to_string(),
        first_name: title_case(first),
        last_name: title_case(last),
        position: None,
    })
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract_page;
    use crate::model::{Fragment, Line};
    use chrono::{Datelike, Timelike};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{name}")).unwrap()
    }

    fn gid() -> GameId {
        GameId::from("401071116")
    }

    #[test]
    fn game_header() {
        let page = Html::parse_document(&fixture("espn_gamecast.html"));
        let game = EspnParser.extract_game(&page, &gid()).unwrap();

        assert_eq!(game.home_score, Some(110));
        assert_eq!(game.away_score, Some(101));
        assert_eq!(game.home_record, Record::new(40, 20));
        assert_eq!(game.away_record, Record::new(39, 23));
        assert_eq!(game.home_home_record, Record::new(21, 8));
        assert_eq!(game.away_away_record, Record::new(18, 13));
        assert_eq!(game.line.favorite.as_deref(), Some("MIL"));
        assert_eq!(game.line.spread, Some(-7.5));
        assert_eq!(game.line.over_under, Some(228.0));

        let date = game.date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2019, 3, 2));
        assert_eq!((date.hour(), date.minute()), (0, 30));
    }

    #[test]
    fn missing_odds_entry_gives_absent_line() {
        let body = fixture("espn_gamecast.html").replace("Line: MIL -7.5", "");
        let game = EspnParser
            .extract_game(&Html::parse_document(&body), &gid())
            .unwrap();
        assert_eq!(game.line, Line::default());
    }

    #[test]
    fn missing_season_record_fails() {
        let body = fixture("espn_gamecast.html").replace("41-20", "");
        let err = EspnParser
            .extract_game(&Html::parse_document(&body), &gid())
            .unwrap_err();
        assert!(matches!(err, ExtractError::MalformedRecord(_)));
    }

    #[test]
    fn missing_venue_record_defaults() {
        let body = fixture("espn_gamecast.html").replace("18-13 Away", "");
        let game = EspnParser
            .extract_game(&Html::parse_document(&body), &gid())
            .unwrap();
        assert_eq!(game.away_away_record, Record::default());
        assert_eq!(game.away_record, Record::new(39, 23));
    }

    #[test]
    fn matchup_totals() {
        let page = Html::parse_document(&fixture("espn_matchup.html"));
        let pair = EspnParser.extract_team_stats(&page, &gid()).unwrap();

        let home = &pair.home;
        assert!(home.home);
        assert_eq!(home.team.abbreviation, "MIL");
        assert_eq!(home.team.location.as_deref(), Some("Milwaukee"));
        assert_eq!(home.team.name, "Bucks");
        assert_eq!((home.line.fg.made, home.line.fg.attempted), (41, 88));
        assert!((home.line.fg.pct - 41.0 / 88.0).abs() < 1e-9);
        assert_eq!(home.line.reb, 52);
        assert_eq!(home.line.pts, 110);
        assert_eq!(home.pts_off_to, 18);
        assert_eq!(home.points_in_paint, 52);
        assert_eq!(home.largest_lead, 15);
        assert_eq!((home.q1_pts, home.q4_pts, home.ot_pts), (30, 26, 0));
        assert_eq!(home.pace, None);

        let away = &pair.away;
        assert!(!away.home);
        assert_eq!(away.team.abbreviation, "BOS");
        assert_eq!((away.line.ft.made, away.line.ft.attempted), (13, 16));
        assert_eq!(away.technical, 1);
        assert_eq!(away.line.pts, 101);
    }

    #[test]
    fn overtime_periods_are_summed() {
        let body = fixture("espn_matchup.html").replace(
            r#"<td>30</td><td>26</td><td>28</td><td>26</td><td class="final-score">110</td>"#,
            r#"<td>30</td><td>26</td><td>28</td><td>16</td><td>6</td><td>4</td><td class="final-score">110</td>"#,
        );
        let pair = EspnParser
            .extract_team_stats(&Html::parse_document(&body), &gid())
            .unwrap();
        assert_eq!(pair.home.q4_pts, 16);
        assert_eq!(pair.home.ot_pts, 10);
    }

    #[test]
    fn header_score_without_line_score() {
        let body = fixture("espn_matchup.html");
        let start = body.find(r#"<table id="linescore""#).unwrap();
        let end = start + body[start..].find("</table>").unwrap() + "</table>".len();
        let body = format!("{}{}", &body[..start], &body[end..]);

        let pair = EspnParser
            .extract_team_stats(&Html::parse_document(&body), &gid())
            .unwrap();
        assert_eq!(pair.home.line.pts, 110);
        assert_eq!(pair.away.line.pts, 101);
        assert_eq!(pair.home.q1_pts, 0);
    }

    #[test]
    fn box_score_players() {
        let page = Html::parse_document(&fixture("espn_boxscore.html"));
        let pair = EspnParser.extract_player_stats(&page, &gid()).unwrap();

        assert_eq!(pair.away.len(), 3);
        assert_eq!(pair.home.len(), 2);

        let irving = &pair.away[0];
        assert_eq!(irving.player.player_id, "6450");
        assert_eq!(irving.player.first_name, "Kyrie");
        assert_eq!(irving.player.last_name, "Irving");
        assert_eq!(irving.player.position.as_deref(), Some("PG"));
        assert_eq!(irving.minutes, 36);
        assert_eq!((irving.line.fg.made, irving.line.fg.attempted), (9, 19));
        assert_eq!(irving.line.ast, 8);
        assert_eq!(irving.plus_minus, -9);
        assert_eq!(irving.line.pts, 25);
        assert!(!irving.home);

        let brown = &pair.away[1];
        assert_eq!(brown.line.ft, Default::default());
        assert_eq!(brown.plus_minus, 2);

        let giannis = &pair.home[0];
        assert!(giannis.home);
        assert_eq!(giannis.line.fg3.attempted, 0);
        assert_eq!(giannis.line.fg3.pct, 0.0);
        assert_eq!(giannis.line.reb, 15);
    }

    #[test]
    fn did_not_play_row_is_kept() {
        let page = Html::parse_document(&fixture("espn_boxscore.html"));
        let pair = EspnParser.extract_player_stats(&page, &gid()).unwrap();

        let baynes = pair
            .away
            .iter()
            .find(|p| p.player.player_id == "2566769")
            .unwrap();
        assert!(baynes.dnp);
        assert_eq!(baynes.player.first_name, "Aron");
        assert_eq!(baynes.player.last_name, "Baynes");
        assert_eq!(baynes.minutes, 0);
        assert_eq!(baynes.line, Default::default());
        assert_eq!(baynes.plus_minus, 0);
    }

    #[test]
    fn team_rows_are_skipped() {
        let page = Html::parse_document(&fixture("espn_boxscore.html"));
        let pair = EspnParser.extract_player_stats(&page, &gid()).unwrap();
        assert!(pair.iter().all(|p| !p.player.player_id.is_empty()));
        assert!(pair.iter().all(|p| p.line.pts < 100));
    }

    #[test]
    fn hyphenated_names() {
        let p = player_from_href("/nba/player/_/id/3136195/karl-anthony-towns").unwrap();
        assert_eq!(p.first_name, "Karl");
        assert_eq!(p.last_name, "Anthony-Towns");
        assert!(player_from_href("/nba/team/_/name/bos").is_none());
    }

    #[test]
    fn extract_page_runs_one_kind_per_page() {
        let out = extract_page(&EspnParser, PageKind::Gamecast, &fixture("espn_gamecast.html"), &gid());
        assert_eq!(out.len(), 1);
        let (kind, result) = &out[0];
        assert_eq!(*kind, FragmentKind::Game);
        assert!(matches!(result, Ok(Fragment::Game(_))));
    }

    #[test]
    fn urls() {
        assert_eq!(
            EspnParser.page_url(&gid(), PageKind::Matchup),
            "https://www.espn.com/nba/matchup?gameId=401071116"
        );
    }
}
