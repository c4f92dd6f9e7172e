use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{Advanced, BoxLine, Game, GameId, Player, PlayerStats, Team, TeamStats};
use crate::parser::Source;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS teams (
            abbr       TEXT PRIMARY KEY,
            location   TEXT,
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS players (
            player_id  TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name  TEXT NOT NULL,
            position   TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS games (
            game_id          TEXT PRIMARY KEY,
            source           TEXT NOT NULL CHECK(source IN ('espn','bbref')),
            date             TEXT,
            home_team        TEXT NOT NULL REFERENCES teams(abbr),
            away_team        TEXT NOT NULL REFERENCES teams(abbr),
            home_score       INTEGER,
            away_score       INTEGER,
            home_wins        INTEGER NOT NULL,
            home_losses      INTEGER NOT NULL,
            away_wins        INTEGER NOT NULL,
            away_losses      INTEGER NOT NULL,
            home_home_wins   INTEGER NOT NULL,
            home_home_losses INTEGER NOT NULL,
            away_away_wins   INTEGER NOT NULL,
            away_away_losses INTEGER NOT NULL,
            line_favorite    TEXT,
            line_spread      REAL,
            over_under       REAL,
            inserted_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_games_date ON games(date);

        CREATE TABLE IF NOT EXISTS team_stats (
            id              INTEGER PRIMARY KEY,
            game_id         TEXT NOT NULL REFERENCES games(game_id),
            team            TEXT NOT NULL REFERENCES teams(abbr),
            home            BOOLEAN NOT NULL,
            fgm INTEGER NOT NULL, fga INTEGER NOT NULL, fg_pct REAL NOT NULL,
            fg3m INTEGER NOT NULL, fg3a INTEGER NOT NULL, fg3_pct REAL NOT NULL,
            ftm INTEGER NOT NULL, fta INTEGER NOT NULL, ft_pct REAL NOT NULL,
            oreb INTEGER NOT NULL, dreb INTEGER NOT NULL, reb INTEGER NOT NULL,
            ast INTEGER NOT NULL, stl INTEGER NOT NULL, blk INTEGER NOT NULL,
            tov INTEGER NOT NULL, pf INTEGER NOT NULL, pts INTEGER NOT NULL,
            q1_pts INTEGER NOT NULL, q2_pts INTEGER NOT NULL,
            q3_pts INTEGER NOT NULL, q4_pts INTEGER NOT NULL,
            ot_pts INTEGER NOT NULL,
            pts_off_to      INTEGER NOT NULL,
            fast_break_pts  INTEGER NOT NULL,
            points_in_paint INTEGER NOT NULL,
            technical       INTEGER NOT NULL,
            flagrant        INTEGER NOT NULL,
            largest_lead    INTEGER NOT NULL,
            pace            REAL,
            ft_per_fga      REAL,
            ts_pct REAL, efg_pct REAL, fg3a_rate REAL, fta_rate REAL,
            oreb_pct REAL, dreb_pct REAL, reb_pct REAL, ast_pct REAL,
            stl_pct REAL, blk_pct REAL, tov_pct REAL, usg_pct REAL,
            off_rating REAL, def_rating REAL, bpm REAL,
            UNIQUE(game_id, team)
        );
        CREATE INDEX IF NOT EXISTS idx_team_stats_team ON team_stats(team);

        CREATE TABLE IF NOT EXISTS player_stats (
            id         INTEGER PRIMARY KEY,
            game_id    TEXT NOT NULL REFERENCES games(game_id),
            player_id  TEXT NOT NULL REFERENCES players(player_id),
            team       TEXT NOT NULL REFERENCES teams(abbr),
            home       BOOLEAN NOT NULL,
            dnp        BOOLEAN NOT NULL,
            minutes    INTEGER NOT NULL,
            fgm INTEGER NOT NULL, fga INTEGER NOT NULL, fg_pct REAL NOT NULL,
            fg3m INTEGER NOT NULL, fg3a INTEGER NOT NULL, fg3_pct REAL NOT NULL,
            ftm INTEGER NOT NULL, fta INTEGER NOT NULL, ft_pct REAL NOT NULL,
            oreb INTEGER NOT NULL, dreb INTEGER NOT NULL, reb INTEGER NOT NULL,
            ast INTEGER NOT NULL, stl INTEGER NOT NULL, blk INTEGER NOT NULL,
            tov INTEGER NOT NULL, pf INTEGER NOT NULL, pts INTEGER NOT NULL,
            plus_minus INTEGER NOT NULL,
            ts_pct REAL, efg_pct REAL, fg3a_rate REAL, fta_rate REAL,
            oreb_pct REAL, dreb_pct REAL, reb_pct REAL, ast_pct REAL,
            stl_pct REAL, blk_pct REAL, tov_pct REAL, usg_pct REAL,
            off_rating REAL, def_rating REAL, bpm REAL,
            UNIQUE(game_id, player_id)
        );
        CREATE INDEX IF NOT EXISTS idx_player_stats_player ON player_stats(player_id);
        ",
    )?;
    Ok(())
}

// ── Reference entities ──

/// Inserts the team or keeps the stored row. A location only fills a
/// missing one.
pub fn upsert_team(conn: &Connection, team: &Team) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO teams (abbr, location, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(abbr) DO UPDATE SET location = COALESCE(teams.location, excluded.location)",
    )?
    .execute(params![team.abbreviation, team.location, team.name])?;
    Ok(())
}

pub fn upsert_player(conn: &Connection, player: &Player) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO players (player_id, first_name, last_name, position) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(player_id) DO UPDATE SET position = COALESCE(excluded.position, players.position)",
    )?
    .execute(params![
        player.player_id,
        player.first_name,
        player.last_name,
        player.position,
    ])?;
    Ok(())
}

// ── Game rows ──

const BOX_COLUMNS: [&str; 18] = [
    "fgm", "fga", "fg_pct", "fg3m", "fg3a", "fg3_pct", "ftm", "fta", "ft_pct", "oreb", "dreb",
    "reb", "ast", "stl", "blk", "tov", "pf", "pts",
];

const ADVANCED_COLUMNS: [&str; 15] = [
    "ts_pct", "efg_pct", "fg3a_rate", "fta_rate", "oreb_pct", "dreb_pct", "reb_pct", "ast_pct",
    "stl_pct", "blk_pct", "tov_pct", "usg_pct", "off_rating", "def_rating", "bpm",
];

fn box_values(l: &BoxLine) -> [&dyn ToSql; 18] {
    [
        &l.fg.made, &l.fg.attempted, &l.fg.pct, &l.fg3.made, &l.fg3.attempted, &l.fg3.pct,
        &l.ft.made, &l.ft.attempted, &l.ft.pct, &l.oreb, &l.dreb, &l.reb, &l.ast, &l.stl,
        &l.blk, &l.tov, &l.pf, &l.pts,
    ]
}

fn advanced_values(a: &Advanced) -> [&dyn ToSql; 15] {
    [
        &a.ts_pct, &a.efg_pct, &a.fg3a_rate, &a.fta_rate, &a.oreb_pct, &a.dreb_pct, &a.reb_pct,
        &a.ast_pct, &a.stl_pct, &a.blk_pct, &a.tov_pct, &a.usg_pct, &a.off_rating,
        &a.def_rating, &a.bpm,
    ]
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        (1..=columns.len()).map(|i| format!("?{i}")).join(", ")
    )
}

pub fn insert_game(conn: &Connection, game: &Game, home_team: &str, away_team: &str) -> Result<()> {
    let date = game.date.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string());
    conn.prepare_cached(
        "INSERT INTO games
         (game_id, source, date, home_team, away_team, home_score, away_score,
          home_wins, home_losses, away_wins, away_losses,
          home_home_wins, home_home_losses, away_away_wins, away_away_losses,
          line_favorite, line_spread, over_under)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
    )?
    .execute(params![
        game.game_id.as_str(),
        game.source.as_str(),
        date,
        home_team,
        away_team,
        game.home_score,
        game.away_score,
        game.home_record.wins,
        game.home_record.losses,
        game.away_record.wins,
        game.away_record.losses,
        game.home_home_record.wins,
        game.home_home_record.losses,
        game.away_away_record.wins,
        game.away_away_record.losses,
        game.line.favorite,
        game.line.spread,
        game.line.over_under,
    ])
    .with_context(|| format!("insert game {}", game.game_id))?;
    Ok(())
}

pub fn insert_team_stats(conn: &Connection, stats: &TeamStats) -> Result<()> {
    let columns = ["game_id", "team", "home"]
        .into_iter()
        .chain(BOX_COLUMNS)
        .chain([
            "q1_pts",
            "q2_pts",
            "q3_pts",
            "q4_pts",
            "ot_pts",
            "pts_off_to",
            "fast_break_pts",
            "points_in_paint",
            "technical",
            "flagrant",
            "largest_lead",
            "pace",
            "ft_per_fga",
        ])
        .chain(ADVANCED_COLUMNS)
        .collect_vec();

    let head: [&dyn ToSql; 3] = [&stats.game_id.0, &stats.team.abbreviation, &stats.home];
    let extras: [&dyn ToSql; 13] = [
        &stats.q1_pts,
        &stats.q2_pts,
        &stats.q3_pts,
        &stats.q4_pts,
        &stats.ot_pts,
        &stats.pts_off_to,
        &stats.fast_break_pts,
        &stats.points_in_paint,
        &stats.technical,
        &stats.flagrant,
        &stats.largest_lead,
        &stats.pace,
        &stats.ft_per_fga,
    ];
    let values = head
        .into_iter()
        .chain(box_values(&stats.line))
        .chain(extras)
        .chain(advanced_values(&stats.advanced))
        .collect_vec();

    conn.prepare_cached(&insert_sql("team_stats", &columns))?
        .execute(values.as_slice())
        .with_context(|| format!("insert team stats {} {}", stats.game_id, stats.team.abbreviation))?;
    Ok(())
}

pub fn insert_player_stats(conn: &Connection, stats: &PlayerStats, team: &str) -> Result<()> {
    let columns = ["game_id", "player_id", "team", "home", "dnp", "minutes"]
        .into_iter()
        .chain(BOX_COLUMNS)
        .chain(["plus_minus"])
        .chain(ADVANCED_COLUMNS)
        .collect_vec();

    let head: [&dyn ToSql; 6] = [
        &stats.game_id.0,
        &stats.player.player_id,
        &team,
        &stats.home,
        &stats.dnp,
        &stats.minutes,
    ];
    let plus_minus: [&dyn ToSql; 1] = [&stats.plus_minus];
    let values = head
        .into_iter()
        .chain(box_values(&stats.line))
        .chain(plus_minus)
        .chain(advanced_values(&stats.advanced))
        .collect_vec();

    conn.prepare_cached(&insert_sql("player_stats", &columns))?
        .execute(values.as_slice())
        .with_context(|| {
            format!("insert player stats {} {}", stats.game_id, stats.player.player_id)
        })?;
    Ok(())
}

// ── Queries ──

/// Game ids already stored for `source`; used to skip finished games.
pub fn known_game_ids(conn: &Connection, source: Source) -> Result<HashSet<GameId>> {
    let mut stmt = conn.prepare("SELECT game_id FROM games WHERE source = ?1")?;
    let ids = stmt
        .query_map([source.as_str()], |row| row.get::<_, String>(0))?
        .map(|r| r.map(GameId))
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub fn game_exists(conn: &Connection, game_id: &GameId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM games WHERE game_id = ?1",
            [game_id.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(n as usize)
}

pub struct Stats {
    pub teams: usize,
    pub players: usize,
    pub games: usize,
    pub team_stats: usize,
    pub player_stats: usize,
    pub dnp: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let dnp: i64 =
        conn.query_row("SELECT COUNT(*) FROM player_stats WHERE dnp = 1", [], |r| r.get(0))?;
    Ok(Stats {
        teams: count_rows(conn, "teams")?,
        players: count_rows(conn, "players")?,
        games: count_rows(conn, "games")?,
        team_stats: count_rows(conn, "team_stats")?,
        player_stats: count_rows(conn, "player_stats")?,
        dnp: dnp as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucks(location: Option<&str>) -> Team {
        Team {
            location: location.map(str::to_string),
            name: "Bucks".into(),
            abbreviation: "MIL".into(),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(count_rows(&conn, "games").unwrap(), 0);
    }

    #[test]
    fn team_upsert_keeps_one_row() {
        let conn = open_in_memory().unwrap();
        upsert_team(&conn, &bucks(None)).unwrap();
        upsert_team(&conn, &bucks(Some("Milwaukee"))).unwrap();
        upsert_team(&conn, &bucks(None)).unwrap();

        assert_eq!(count_rows(&conn, "teams").unwrap(), 1);
        let location: Option<String> = conn
            .query_row("SELECT location FROM teams WHERE abbr = 'MIL'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(location.as_deref(), Some("Milwaukee"));
    }

    #[test]
    fn player_upsert_keeps_known_position() {
        let conn = open_in_memory().unwrap();
        let mut p = Player {
            player_id: "6450".into(),
            first_name: "Kyrie".into(),
            last_name: "Irving".into(),
            position: Some("PG".into()),
        };
        upsert_player(&conn, &p).unwrap();
        p.position = None;
        upsert_player(&conn, &p).unwrap();

        assert_eq!(count_rows(&conn, "players").unwrap(), 1);
        let pos: Option<String> = conn
            .query_row("SELECT position FROM players", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pos.as_deref(), Some("PG"));
    }

    #[test]
    fn insert_sql_numbers_placeholders() {
        assert_eq!(
            insert_sql("t", &["a", "b", "c"]),
            "INSERT INTO t (a, b, c) VALUES (?1, ?2, ?3)"
        );
    }
}
