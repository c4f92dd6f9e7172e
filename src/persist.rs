//! Writes one completed game to the store.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

use crate::db;
use crate::model::CompletedRecord;

/// Rows written for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub teams: usize,
    pub players: usize,
    pub team_stats: usize,
    pub player_stats: usize,
}

/// Upserts both teams and every player, then inserts the game, its two
/// team rows and its player rows. All of it commits together or not at all.
pub fn persist(conn: &Connection, record: &CompletedRecord) -> Result<PersistSummary> {
    let game_id = record.game_id();
    let home = &record.team_stats.home;
    let away = &record.team_stats.away;

    let tx = conn
        .unchecked_transaction()
        .with_context(|| format!("begin transaction for game {game_id}"))?;
    let mut summary = PersistSummary::default();

    for team in [&home.team, &away.team] {
        db::upsert_team(&tx, team)?;
        summary.teams += 1;
    }
    for stats in record.player_stats.iter() {
        db::upsert_player(&tx, &stats.player)?;
        summary.players += 1;
    }

    db::insert_game(&tx, &record.game, &home.team.abbreviation, &away.team.abbreviation)?;

    for stats in [home, away] {
        db::insert_team_stats(&tx, stats)?;
        summary.team_stats += 1;
    }
    for stats in record.player_stats.iter() {
        let team = if stats.home { home } else { away };
        db::insert_player_stats(&tx, stats, &team.team.abbreviation)?;
        summary.player_stats += 1;
    }

    tx.commit()
        .with_context(|| format!("commit game {game_id}"))?;
    debug!(%game_id, players = summary.player_stats, "game persisted");
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{count_rows, open_in_memory};
    use crate::model::{
        Game, GameId, Line, Player, PlayerStats, PlayerStatsPair, Record, Team, TeamStats,
        TeamStatsPair,
    };
    use crate::parser::fields::StatSheet;
    use crate::parser::Source;

    fn team(abbr: &str, location: Option<&str>) -> Team {
        Team {
            location: location.map(str::to_string),
            name: abbr.to_lowercase(),
            abbreviation: abbr.to_string(),
        }
    }

    fn player(id: &str) -> Player {
        Player {
            player_id: id.to_string(),
            first_name: "First".into(),
            last_name: format!("Last{id}"),
            position: None,
        }
    }

    /// A small game between `home` and `away` with one player each.
    pub(crate) fn sample_record(id: &str, home: &str, away: &str) -> CompletedRecord {
        let game_id = GameId::from(id);
        let sheet = StatSheet::new();
        let team_stats: TeamStats = sheet.team_stats(&game_id, team(home, None), true);
        let away_stats: TeamStats = sheet.team_stats(&game_id, team(away, Some("Boston")), false);
        let home_player: PlayerStats =
            sheet.player_stats(&game_id, player(&format!("{id}h")), true, false);
        let away_player: PlayerStats =
            sheet.player_stats(&game_id, player(&format!("{id}a")), false, true);

        CompletedRecord {
            game: Game {
                game_id: game_id.clone(),
                source: Source::Espn,
                date: None,
                home_score: Some(110),
                away_score: Some(101),
                home_record: Record::new(40, 20),
                away_record: Record::new(39, 23),
                home_home_record: Record::new(21, 8),
                away_away_record: Record::new(18, 13),
                line: Line {
                    favorite: Some(home.to_string()),
                    spread: Some(-7.5),
                    over_under: Some(228.0),
                },
            },
            team_stats: TeamStatsPair {
                home: team_stats,
                away: away_stats,
            },
            player_stats: PlayerStatsPair {
                home: vec![home_player],
                away: vec![away_player],
            },
        }
    }

    #[test]
    fn writes_every_row() {
        let conn = open_in_memory().unwrap();
        let summary = persist(&conn, &sample_record("1", "MIL", "BOS")).unwrap();

        assert_eq!(summary.team_stats, 2);
        assert_eq!(summary.player_stats, 2);
        assert_eq!(count_rows(&conn, "games").unwrap(), 1);
        assert_eq!(count_rows(&conn, "team_stats").unwrap(), 2);
        assert_eq!(count_rows(&conn, "player_stats").unwrap(), 2);

        let (team, dnp): (String, bool) = conn
            .query_row(
                "SELECT team, dnp FROM player_stats WHERE player_id = '1a'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(team, "BOS");
        assert!(dnp);
    }

    #[test]
    fn teams_shared_across_games_stay_unique() {
        let conn = open_in_memory().unwrap();
        persist(&conn, &sample_record("1", "MIL", "BOS")).unwrap();
        persist(&conn, &sample_record("2", "BOS", "MIL")).unwrap();

        assert_eq!(count_rows(&conn, "teams").unwrap(), 2);
        assert_eq!(count_rows(&conn, "games").unwrap(), 2);
        let location: Option<String> = conn
            .query_row("SELECT location FROM teams WHERE abbr = 'BOS'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(location.as_deref(), Some("Boston"));
    }

    #[test]
    fn duplicate_game_rolls_back_everything() {
        let conn = open_in_memory().unwrap();
        persist(&conn, &sample_record("1", "MIL", "BOS")).unwrap();

        let mut again = sample_record("1", "NYK", "BKN");
        again.player_stats.home[0].player = player("fresh");
        assert!(persist(&conn, &again).is_err());

        assert_eq!(count_rows(&conn, "teams").unwrap(), 2);
        assert_eq!(count_rows(&conn, "players").unwrap(), 2);
        assert_eq!(count_rows(&conn, "team_stats").unwrap(), 2);
    }
}
