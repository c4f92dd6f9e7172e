//! Canonical statistic names and the per-site label tables that map onto them.

use std::collections::HashMap;

use tracing::trace;

use super::text::{parse_minutes, parse_number, parse_signed};
use crate::model::{
    Advanced, BoxLine, GameId, Player, PlayerStats, ShootingSplit, Team, TeamStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    FieldGoalsMade,
    FieldGoalsAttempted,
    ThreesMade,
    ThreesAttempted,
    FreeThrowsMade,
    FreeThrowsAttempted,
    OffRebounds,
    DefRebounds,
    Rebounds,
    Assists,
    Steals,
    Blocks,
    Turnovers,
    Fouls,
    Points,
    Minutes,
    PlusMinus,
    PointsOffTurnovers,
    FastBreakPoints,
    PointsInPaint,
    Technicals,
    Flagrants,
    LargestLead,
    Q1Points,
    Q2Points,
    Q3Points,
    Q4Points,
    OvertimePoints,
    Pace,
    FtPerFga,
    TrueShootingPct,
    EffectiveFgPct,
    ThreePointRate,
    FreeThrowRate,
    OffReboundPct,
    DefReboundPct,
    ReboundPct,
    AssistPct,
    StealPct,
    BlockPct,
    TurnoverPct,
    UsagePct,
    OffRating,
    DefRating,
    BoxPlusMinus,
}

/// What a field holds when the page does not report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    /// Counting stats: 0.
    Zero,
    /// Site-dependent metrics: absent.
    Absent,
}

impl Stat {
    pub fn policy(self) -> DefaultPolicy {
        use Stat::*;
        match self {
            Pace | FtPerFga | TrueShootingPct | EffectiveFgPct | ThreePointRate
            | FreeThrowRate | OffReboundPct | DefReboundPct | ReboundPct | AssistPct
            | StealPct | BlockPct | TurnoverPct | UsagePct | OffRating | DefRating
            | BoxPlusMinus => DefaultPolicy::Absent,
            _ => DefaultPolicy::Zero,
        }
    }

    fn parse_value(self, raw: &str) -> Option<f64> {
        match self {
            Stat::Minutes => parse_minutes(raw).map(f64::from),
            Stat::PlusMinus => parse_signed(raw).map(f64::from),
            _ => parse_number(raw),
        }
    }
}

/// One site's label vocabulary for one stat group.
pub struct FieldMap {
    pub name: &'static str,
    entries: &'static [(&'static str, Stat)],
}

impl FieldMap {
    pub const fn new(name: &'static str, entries: &'static [(&'static str, Stat)]) -> Self {
        FieldMap { name, entries }
    }

    pub fn get(&self, label: &str) -> Option<Stat> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, s)| *s)
    }
}

// ── ESPN ──

/// Matchup page `data-stat-attr` names. Split rows such as
/// `fieldGoalsMade-fieldGoalsAttempted` are looked up half by half.
pub const ESPN_TEAM: FieldMap = FieldMap::new(
    "espn_team",
    &[
        ("fieldGoalsMade", Stat::FieldGoalsMade),
        ("fieldGoalsAttempted", Stat::FieldGoalsAttempted),
        ("threePointFieldGoalsMade", Stat::ThreesMade),
        ("threePointFieldGoalsAttempted", Stat::ThreesAttempted),
        ("freeThrowsMade", Stat::FreeThrowsMade),
        ("freeThrowsAttempted", Stat::FreeThrowsAttempted),
        ("totalRebounds", Stat::Rebounds),
        ("offensiveRebounds", Stat::OffRebounds),
        ("defensiveRebounds", Stat::DefRebounds),
        ("assists", Stat::Assists),
        ("steals", Stat::Steals),
        ("blocks", Stat::Blocks),
        ("totalTurnovers", Stat::Turnovers),
        ("turnovers", Stat::Turnovers),
        ("turnoverPoints", Stat::PointsOffTurnovers),
        ("fastBreakPoints", Stat::FastBreakPoints),
        ("pointsInPaint", Stat::PointsInPaint),
        ("fouls", Stat::Fouls),
        ("technicalFouls", Stat::Technicals),
        ("flagrantFouls", Stat::Flagrants),
        ("largestLead", Stat::LargestLead),
    ],
);

/// Boxscore cell classes for single-value columns.
pub const ESPN_PLAYER: FieldMap = FieldMap::new(
    "espn_player",
    &[
        ("min", Stat::Minutes),
        ("oreb", Stat::OffRebounds),
        ("dreb", Stat::DefRebounds),
        ("reb", Stat::Rebounds),
        ("ast", Stat::Assists),
        ("stl", Stat::Steals),
        ("blk", Stat::Blocks),
        ("to", Stat::Turnovers),
        ("pf", Stat::Fouls),
        ("plusminus", Stat::PlusMinus),
        ("pts", Stat::Points),
    ],
);

/// Boxscore cell classes holding `M-A` splits.
pub const ESPN_PLAYER_SPLITS: &[(&str, Stat, Stat)] = &[
    ("fg", Stat::FieldGoalsMade, Stat::FieldGoalsAttempted),
    ("3pt", Stat::ThreesMade, Stat::ThreesAttempted),
    ("ft", Stat::FreeThrowsMade, Stat::FreeThrowsAttempted),
];

// ── basketball-reference ──

pub const BBREF_BASIC: FieldMap = FieldMap::new(
    "bbref_basic",
    &[
        ("mp", Stat::Minutes),
        ("fg", Stat::FieldGoalsMade),
        ("fga", Stat::FieldGoalsAttempted),
        ("fg3", Stat::ThreesMade),
        ("fg3a", Stat::ThreesAttempted),
        ("ft", Stat::FreeThrowsMade),
        ("fta", Stat::FreeThrowsAttempted),
        ("orb", Stat::OffRebounds),
        ("drb", Stat::DefRebounds),
        ("trb", Stat::Rebounds),
        ("ast", Stat::Assists),
        ("stl", Stat::Steals),
        ("blk", Stat::Blocks),
        ("tov", Stat::Turnovers),
        ("pf", Stat::Fouls),
        ("pts", Stat::Points),
        ("plus_minus", Stat::PlusMinus),
    ],
);

pub const BBREF_ADVANCED: FieldMap = FieldMap::new(
    "bbref_advanced",
    &[
        ("ts_pct", Stat::TrueShootingPct),
        ("efg_pct", Stat::EffectiveFgPct),
        ("fg3a_per_fga_pct", Stat::ThreePointRate),
        ("fta_per_fga_pct", Stat::FreeThrowRate),
        ("orb_pct", Stat::OffReboundPct),
        ("drb_pct", Stat::DefReboundPct),
        ("trb_pct", Stat::ReboundPct),
        ("ast_pct", Stat::AssistPct),
        ("stl_pct", Stat::StealPct),
        ("blk_pct", Stat::BlockPct),
        ("tov_pct", Stat::TurnoverPct),
        ("usg_pct", Stat::UsagePct),
        ("off_rtg", Stat::OffRating),
        ("def_rtg", Stat::DefRating),
        ("bpm", Stat::BoxPlusMinus),
    ],
);

pub const BBREF_FOUR_FACTOR: FieldMap = FieldMap::new(
    "bbref_four_factor",
    &[("pace", Stat::Pace), ("ft_rate", Stat::FtPerFga)],
);

/// Regulation quarters only; `1OT`, `2OT`, ... are summed by the caller.
pub const BBREF_LINE_SCORE: FieldMap = FieldMap::new(
    "bbref_line_score",
    &[
        ("1", Stat::Q1Points),
        ("2", Stat::Q2Points),
        ("3", Stat::Q3Points),
        ("4", Stat::Q4Points),
    ],
);

pub const QUARTERS: [Stat; 4] = [
    Stat::Q1Points,
    Stat::Q2Points,
    Stat::Q3Points,
    Stat::Q4Points,
];

// ── Sheet ──

/// Raw values collected for one team or player before the record is built.
#[derive(Debug, Clone, Default)]
pub struct StatSheet {
    values: HashMap<Stat, f64>,
}

impl StatSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, stat: Stat, value: f64) {
        self.values.insert(stat, value);
    }

    pub fn add(&mut self, stat: Stat, value: f64) {
        *self.values.entry(stat).or_insert(0.0) += value;
    }

    /// Maps `label` through `map` and stores the parsed value. Unknown labels
    /// and unreadable values are dropped; returns whether anything was stored.
    pub fn record(&mut self, map: &FieldMap, label: &str, raw: &str) -> bool {
        let Some(stat) = map.get(label) else {
            trace!(table = map.name, label, "unmapped label");
            return false;
        };
        match stat.parse_value(raw) {
            Some(v) => {
                self.set(stat, v);
                true
            }
            None => false,
        }
    }

    pub fn record_split(&mut self, made: Stat, attempted: Stat, split: ShootingSplit) {
        self.set(made, split.made as f64);
        self.set(attempted, split.attempted as f64);
    }

    pub fn merge(&mut self, other: StatSheet) {
        self.values.extend(other.values);
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Counting stat, 0 when absent.
    pub fn count(&self, stat: Stat) -> u32 {
        debug_assert_eq!(stat.policy(), DefaultPolicy::Zero);
        self.values
            .get(&stat)
            .map(|v| v.max(0.0).round() as u32)
            .unwrap_or(0)
    }

    pub fn signed(&self, stat: Stat) -> i32 {
        self.values.get(&stat).map(|v| v.round() as i32).unwrap_or(0)
    }

    /// Site-dependent metric, `None` when absent.
    pub fn metric(&self, stat: Stat) -> Option<f64> {
        debug_assert_eq!(stat.policy(), DefaultPolicy::Absent);
        self.values.get(&stat).copied()
    }

    /// Percentage is always derived from the counts; an inconsistent pair
    /// falls back to an empty split.
    pub fn split(&self, made: Stat, attempted: Stat) -> ShootingSplit {
        ShootingSplit::new(self.count(made), self.count(attempted)).unwrap_or_default()
    }

    pub fn box_line(&self) -> BoxLine {
        use Stat::*;
        BoxLine {
            fg: self.split(FieldGoalsMade, FieldGoalsAttempted),
            fg3: self.split(ThreesMade, ThreesAttempted),
            ft: self.split(FreeThrowsMade, FreeThrowsAttempted),
            oreb: self.count(OffRebounds),
            dreb: self.count(DefRebounds),
            reb: self.count(Rebounds),
            ast: self.count(Assists),
            stl: self.count(Steals),
            blk: self.count(Blocks),
            tov: self.count(Turnovers),
            pf: self.count(Fouls),
            pts: self.count(Points),
        }
    }

    pub fn advanced(&self) -> Advanced {
        use Stat::*;
        Advanced {
            ts_pct: self.metric(TrueShootingPct),
            efg_pct: self.metric(EffectiveFgPct),
            fg3a_rate: self.metric(ThreePointRate),
            fta_rate: self.metric(FreeThrowRate),
            oreb_pct: self.metric(OffReboundPct),
            dreb_pct: self.metric(DefReboundPct),
            reb_pct: self.metric(ReboundPct),
            ast_pct: self.metric(AssistPct),
            stl_pct: self.metric(StealPct),
            blk_pct: self.metric(BlockPct),
            tov_pct: self.metric(TurnoverPct),
            usg_pct: self.metric(UsagePct),
            off_rating: self.metric(OffRating),
            def_rating: self.metric(DefRating),
            bpm: self.metric(BoxPlusMinus),
        }
    }

    pub fn team_stats(&self, game_id: &GameId, team: Team, home: bool) -> TeamStats {
        use Stat::*;
        TeamStats {
            game_id: game_id.clone(),
            team,
            home,
            line: self.box_line(),
            q1_pts: self.count(Q1Points),
            q2_pts: self.count(Q2Points),
            q3_pts: self.count(Q3Points),
            q4_pts: self.count(Q4Points),
            ot_pts: self.count(OvertimePoints),
            pts_off_to: self.count(PointsOffTurnovers),
            fast_break_pts: self.count(FastBreakPoints),
            points_in_paint: self.count(PointsInPaint),
            technical: self.count(Technicals),
            flagrant: self.count(Flagrants),
            largest_lead: self.count(LargestLead),
            pace: self.metric(Pace),
            ft_per_fga: self.metric(FtPerFga),
            advanced: self.advanced(),
        }
    }

    /// A Did-Not-Play row is built from an empty sheet, so every counting
    /// stat is 0.
    pub fn player_stats(
        &self,
        game_id: &GameId,
        player: Player,
        home: bool,
        dnp: bool,
    ) -> PlayerStats {
        PlayerStats {
            game_id: game_id.clone(),
            player,
            home,
            dnp,
            minutes: self.count(Stat::Minutes),
            line: self.box_line(),
            plus_minus: self.signed(Stat::PlusMinus),
            advanced: self.advanced(),
        }
    }
}

/// `1OT`, `2OT`, ... column labels.
pub fn is_overtime_label(label: &str) -> bool {
    label
        .strip_suffix("OT")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}
