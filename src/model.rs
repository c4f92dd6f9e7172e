use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::parser::Source;

/// Site-native game identifier (`401071116` on ESPN, `200601010NJN` on
/// basketball-reference).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        GameId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        GameId(s.to_string())
    }
}

// ── Game ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
}

impl Record {
    pub fn new(wins: u32, losses: u32) -> Self {
        Record { wins, losses }
    }
}

/// Betting line. All three fields are `None` when the page offers no line,
/// which is distinct from an "EVEN" line (favorite "EVEN", spread 0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub favorite: Option<String>,
    pub spread: Option<f64>,
    pub over_under: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: GameId,
    pub source: Source,
    pub date: Option<NaiveDateTime>,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    /// Season records as of before this game.
    pub home_record: Record,
    pub away_record: Record,
    /// Home team's record at home, away team's record on the road.
    pub home_home_record: Record,
    pub away_away_record: Record,
    pub line: Line,
}

// ── Teams and players ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub location: Option<String>,
    pub name: String,
    pub abbreviation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: String,
    pub first_name: String,
    pub last_name: String,
    pub position: Option<String>,
}

// ── Stat blocks ──

/// Made/attempted pair with its derived percentage as a fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShootingSplit {
    pub made: u32,
    pub attempted: u32,
    pub pct: f64,
}

impl ShootingSplit {
    /// Returns `None` when `made > attempted`.
    pub fn new(made: u32, attempted: u32) -> Option<Self> {
        if made > attempted {
            return None;
        }
        let pct = if attempted == 0 {
            0.0
        } else {
            made as f64 / attempted as f64
        };
        Some(ShootingSplit {
            made,
            attempted,
            pct,
        })
    }
}

/// Counting stats shared by team and player box lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxLine {
    pub fg: ShootingSplit,
    pub fg3: ShootingSplit,
    pub ft: ShootingSplit,
    pub oreb: u32,
    pub dreb: u32,
    pub reb: u32,
    pub ast: u32,
    pub stl: u32,
    pub blk: u32,
    pub tov: u32,
    pub pf: u32,
    pub pts: u32,
}

/// Rate and efficiency metrics. Only basketball-reference reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advanced {
    pub ts_pct: Option<f64>,
    pub efg_pct: Option<f64>,
    pub fg3a_rate: Option<f64>,
    pub fta_rate: Option<f64>,
    pub oreb_pct: Option<f64>,
    pub dreb_pct: Option<f64>,
    pub reb_pct: Option<f64>,
    pub ast_pct: Option<f64>,
    pub stl_pct: Option<f64>,
    pub blk_pct: Option<f64>,
    pub tov_pct: Option<f64>,
    pub usg_pct: Option<f64>,
    pub off_rating: Option<f64>,
    pub def_rating: Option<f64>,
    pub bpm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub game_id: GameId,
    pub team: Team,
    pub home: bool,
    pub line: BoxLine,
    pub q1_pts: u32,
    pub q2_pts: u32,
    pub q3_pts: u32,
    pub q4_pts: u32,
    /// All overtime periods summed.
    pub ot_pts: u32,
    pub pts_off_to: u32,
    pub fast_break_pts: u32,
    pub points_in_paint: u32,
    pub technical: u32,
    pub flagrant: u32,
    pub largest_lead: u32,
    pub pace: Option<f64>,
    pub ft_per_fga: Option<f64>,
    pub advanced: Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub game_id: GameId,
    pub player: Player,
    pub home: bool,
    pub dnp: bool,
    pub minutes: u32,
    pub line: BoxLine,
    pub plus_minus: i32,
    pub advanced: Advanced,
}

// ── Fragments ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatsPair {
    pub home: TeamStats,
    pub away: TeamStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatsPair {
    pub home: Vec<PlayerStats>,
    pub away: Vec<PlayerStats>,
}

impl PlayerStatsPair {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.home.len() + self.away.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerStats> {
        self.home.iter().chain(self.away.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Game,
    TeamStats,
    PlayerStats,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 3] = [
        FragmentKind::Game,
        FragmentKind::TeamStats,
        FragmentKind::PlayerStats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Game => "game",
            FragmentKind::TeamStats => "team_stats",
            FragmentKind::PlayerStats => "player_stats",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independently parsed piece of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Fragment {
    Game(Game),
    TeamStats(TeamStatsPair),
    PlayerStats(PlayerStatsPair),
}

impl Fragment {
    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::Game(_) => FragmentKind::Game,
            Fragment::TeamStats(_) => FragmentKind::TeamStats,
            Fragment::PlayerStats(_) => FragmentKind::PlayerStats,
        }
    }

    /// Game the fragment was extracted for. `None` for a player fragment
    /// with no rows.
    pub fn game_id(&self) -> Option<&GameId> {
        match self {
            Fragment::Game(g) => Some(&g.game_id),
            Fragment::TeamStats(t) => Some(&t.home.game_id),
            Fragment::PlayerStats(p) => p.iter().next().map(|s| &s.game_id),
        }
    }
}

/// All three fragments of one game, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub game: Game,
    pub team_stats: TeamStatsPair,
    pub player_stats: PlayerStatsPair,
}

impl CompletedRecord {
    pub fn game_id(&self) -> &GameId {
        &self.game.game_id
    }
}
