pub mod bbref;
pub mod espn;
pub mod fields;
pub mod text;

use std::fmt;
use std::sync::Arc;

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExtractError;
use crate::model::{Fragment, FragmentKind, Game, GameId, PlayerStatsPair, Record, TeamStatsPair};

/// Statistics provider a page comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Espn,
    Bbref,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Espn => "espn",
            Source::Bbref => "bbref",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page types a site serves per game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Gamecast,
    Boxscore,
    Matchup,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Gamecast => "gamecast",
            PageKind::Boxscore => "boxscore",
            PageKind::Matchup => "matchup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gamecast" => Some(PageKind::Gamecast),
            "boxscore" => Some(PageKind::Boxscore),
            "matchup" => Some(PageKind::Matchup),
            _ => None,
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One site dialect. Implementations are stateless; every call is a pure
/// function of one parsed page.
pub trait BoxScoreParser: Send + Sync {
    fn source(&self) -> Source;

    /// Which page carries the given fragment.
    fn page_for(&self, kind: FragmentKind) -> PageKind;

    fn page_url(&self, game_id: &GameId, page: PageKind) -> String;

    fn extract_game(&self, page: &Html, game_id: &GameId) -> Result<Game, ExtractError>;

    fn extract_team_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<TeamStatsPair, ExtractError>;

    fn extract_player_stats(
        &self,
        page: &Html,
        game_id: &GameId,
    ) -> Result<PlayerStatsPair, ExtractError>;

    fn extract(
        &self,
        kind: FragmentKind,
        page: &Html,
        game_id: &GameId,
    ) -> Result<Fragment, ExtractError> {
        Ok(match kind {
            FragmentKind::Game => Fragment::Game(self.extract_game(page, game_id)?),
            FragmentKind::TeamStats => {
                Fragment::TeamStats(self.extract_team_stats(page, game_id)?)
            }
            FragmentKind::PlayerStats => {
                Fragment::PlayerStats(self.extract_player_stats(page, game_id)?)
            }
        })
    }

    /// Fragment kinds read from `page`, in a stable order.
    fn kinds_on(&self, page: PageKind) -> Vec<FragmentKind> {
        FragmentKind::ALL
            .into_iter()
            .filter(|k| self.page_for(*k) == page)
            .collect()
    }

    /// Distinct pages needed for a full record.
    fn pages(&self) -> Vec<PageKind> {
        let mut pages: Vec<PageKind> = Vec::with_capacity(3);
        for kind in FragmentKind::ALL {
            let page = self.page_for(kind);
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
        pages
    }
}

pub fn parser_for(source: Source) -> Arc<dyn BoxScoreParser> {
    match source {
        Source::Espn => Arc::new(espn::EspnParser),
        Source::Bbref => Arc::new(bbref::BbrefParser),
    }
}

/// Parses `body` once and runs every extractor that reads `page`.
pub fn extract_page(
    parser: &dyn BoxScoreParser,
    page: PageKind,
    body: &str,
    game_id: &GameId,
) -> Vec<(FragmentKind, Result<Fragment, ExtractError>)> {
    let doc = Html::parse_document(body);
    parser
        .kinds_on(page)
        .into_iter()
        .map(|kind| (kind, parser.extract(kind, &doc, game_id)))
        .collect()
}

/// Season records as of before the game.
///
/// Sites report records that already include this game. The winner's win
/// count is decremented; the loser's record is kept as reported. Missing or
/// tied scores leave both records untouched.
pub fn pre_game_records(
    game_id: &GameId,
    home: Record,
    away: Record,
    home_score: Option<u32>,
    away_score: Option<u32>,
) -> (Record, Record) {
    match (home_score, away_score) {
        (Some(h), Some(a)) if h > a => (decrement_win(home), away),
        (Some(h), Some(a)) if a > h => (home, decrement_win(away)),
        _ => {
            warn!(%game_id, ?home_score, ?away_score, "no winner; records kept as reported");
            (home, away)
        }
    }
}

fn decrement_win(r: Record) -> Record {
    Record {
        wins: r.wins.saturating_sub(1),
        losses: r.losses,
    }
}

// ── DOM helpers ──

pub(crate) fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{css}: {e}")))
}

/// Concatenated, trimmed text of an element.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text of the element's direct text children only.
pub(crate) fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|n| match n.value() {
            Node::Text(t) => Some(&**t),
            _ => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Contents of HTML comments below `el`, joined.
pub(crate) fn comment_text(el: ElementRef<'_>) -> String {
    el.descendants()
        .filter_map(|n| n.value().as_comment().map(|c| &**c))
        .collect::<Vec<&str>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid() -> GameId {
        GameId::from("401071116")
    }

    #[test]
    fn home_win_decrements_home_only() {
        let (home, away) = pre_game_records(
            &gid(),
            Record::new(41, 20),
            Record::new(39, 23),
            Some(110),
            Some(101),
        );
        assert_eq!(home, Record::new(40, 20));
        assert_eq!(away, Record::new(39, 23));
    }

    #[test]
    fn away_win_decrements_away_only() {
        let (home, away) = pre_game_records(
            &gid(),
            Record::new(41, 20),
            Record::new(39, 23),
            Some(99),
            Some(104),
        );
        assert_eq!(home, Record::new(41, 20));
        assert_eq!(away, Record::new(38, 23));
    }

    #[test]
    fn missing_score_keeps_records() {
        let (home, away) =
            pre_game_records(&gid(), Record::new(1, 0), Record::new(0, 1), None, Some(90));
        assert_eq!((home, away), (Record::new(1, 0), Record::new(0, 1)));
    }

    #[test]
    fn decrement_saturates() {
        let (home, _) =
            pre_game_records(&gid(), Record::new(0, 0), Record::new(0, 0), Some(2), Some(1));
        assert_eq!(home, Record::new(0, 0));
    }

    #[test]
    fn page_plans() {
        let espn = parser_for(Source::Espn);
        assert_eq!(espn.pages().len(), 3);
        assert_eq!(espn.kinds_on(PageKind::Matchup), vec![FragmentKind::TeamStats]);

        let bbref = parser_for(Source::Bbref);
        assert_eq!(bbref.pages(), vec![PageKind::Boxscore]);
        assert_eq!(bbref.kinds_on(PageKind::Boxscore).len(), 3);
    }

    #[test]
    fn own_text_skips_children() {
        let doc = Html::parse_fragment(r#"<div class="record">39-23<span>18-13 Away</span></div>"#);
        let sel = selector("div.record").unwrap();
        let el = doc.select(&sel).next().unwrap();
        assert_eq!(own_text(el), "39-23");
        assert_eq!(text_of(el), "39-2318-13 Away");
    }

    #[test]
    fn comments_are_collected() {
        let doc = Html::parse_fragment(r#"<div id="wrap"><!-- <table><tr><td>1</td></tr></table> --></div>"#);
        let sel = selector("#wrap").unwrap();
        let el = doc.select(&sel).next().unwrap();
        assert!(comment_text(el).contains("<td>1</td>"));
    }
}
