//! Joins the three fragments of a game into one record.
//!
//! Fragments arrive in any order from concurrent workers. A game completes
//! exactly once: the call that supplies the last missing kind gets the record
//! back, later fragments for that game are refused.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::model::{
    CompletedRecord, Fragment, FragmentKind, Game, GameId, PlayerStatsPair, TeamStatsPair,
};

struct Partial {
    first_seen: Instant,
    game: Option<Game>,
    team_stats: Option<TeamStatsPair>,
    player_stats: Option<PlayerStatsPair>,
}

impl Partial {
    fn new() -> Self {
        Partial {
            first_seen: Instant::now(),
            game: None,
            team_stats: None,
            player_stats: None,
        }
    }

    /// Stores the fragment; returns true when it replaced one of the same kind.
    fn put(&mut self, fragment: Fragment) -> bool {
        match fragment {
            Fragment::Game(g) => self.game.replace(g).is_some(),
            Fragment::TeamStats(t) => self.team_stats.replace(t).is_some(),
            Fragment::PlayerStats(p) => self.player_stats.replace(p).is_some(),
        }
    }

    fn is_complete(&self) -> bool {
        self.game.is_some() && self.team_stats.is_some() && self.player_stats.is_some()
    }

    fn into_record(self) -> Option<CompletedRecord> {
        Some(CompletedRecord {
            game: self.game?,
            team_stats: self.team_stats?,
            player_stats: self.player_stats?,
        })
    }

    fn missing(&self) -> Vec<FragmentKind> {
        let mut out = Vec::new();
        if self.game.is_none() {
            out.push(FragmentKind::Game);
        }
        if self.team_stats.is_none() {
            out.push(FragmentKind::TeamStats);
        }
        if self.player_stats.is_none() {
            out.push(FragmentKind::PlayerStats);
        }
        out
    }
}

#[derive(Default)]
struct State {
    pending: HashMap<GameId, Partial>,
    attempted: HashSet<GameId>,
    completed: HashSet<GameId>,
    expired: HashSet<GameId>,
    duplicates: usize,
    rejected: usize,
}

/// End-of-run accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    pub attempted: usize,
    pub completed: usize,
    /// Games still missing at least one fragment, sorted.
    pub pending: Vec<GameId>,
    pub expired: Vec<GameId>,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Created once per run and shared between workers behind an `Arc`.
#[derive(Default)]
pub struct Assembler {
    state: Mutex<State>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a game the run intends to complete.
    pub fn mark_attempted(&self, game_id: &GameId) {
        self.lock().attempted.insert(game_id.clone());
    }

    /// Merges one fragment. Returns the full record when this fragment was the
    /// last one missing; `None` otherwise, including for refused fragments.
    pub fn submit(&self, game_id: &GameId, fragment: Fragment) -> Option<CompletedRecord> {
        let kind = fragment.kind();
        let mut state = self.lock();

        if let Some(own) = fragment.game_id().filter(|own| *own != game_id) {
            state.rejected += 1;
            warn!(%game_id, fragment_game = %own, %kind, "fragment filed under another game rejected");
            return None;
        }
        if state.completed.contains(game_id) || state.expired.contains(game_id) {
            state.rejected += 1;
            warn!(%game_id, %kind, "fragment for a closed game rejected");
            return None;
        }
        state.attempted.insert(game_id.clone());

        let partial = state
            .pending
            .entry(game_id.clone())
            .or_insert_with(Partial::new);
        let replaced = partial.put(fragment);
        let complete = partial.is_complete();
        if replaced {
            state.duplicates += 1;
            debug!(%game_id, %kind, "duplicate fragment, keeping the latest");
        }
        if !complete {
            return None;
        }

        let record = state.pending.remove(game_id)?.into_record()?;
        state.completed.insert(game_id.clone());
        debug!(%game_id, "record complete");
        Some(record)
    }

    /// Evicts games pending longer than `max_age`. Their late fragments are
    /// refused from then on.
    pub fn expire(&self, max_age: Duration) -> Vec<GameId> {
        let mut state = self.lock();
        let stale: Vec<GameId> = state
            .pending
            .iter()
            .filter(|(_, p)| p.first_seen.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(p) = state.pending.remove(id) {
                warn!(game_id = %id, missing = ?p.missing(), "expired incomplete game");
            }
            state.expired.insert(id.clone());
        }
        stale
    }

    /// Kinds still missing for a pending game.
    pub fn missing(&self, game_id: &GameId) -> Option<Vec<FragmentKind>> {
        self.lock().pending.get(game_id).map(Partial::missing)
    }

    pub fn report(&self) -> AssemblyReport {
        let state = self.lock();
        let mut pending: Vec<GameId> = state.pending.keys().cloned().collect();
        pending.sort();
        let mut expired: Vec<GameId> = state.expired.iter().cloned().collect();
        expired.sort();
        AssemblyReport {
            attempted: state.attempted.len(),
            completed: state.completed.len(),
            pending,
            expired,
            duplicates: state.duplicates,
            rejected: state.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Line, Record, Team, TeamStats};
    use crate::parser::Source;

    fn gid(s: &str) -> GameId {
        GameId::from(s)
    }

    fn game(id: &GameId) -> Fragment {
        Fragment::Game(Game {
            game_id: id.clone(),
            source: Source::Espn,
            date: None,
            home_score: Some(110),
            away_score: Some(101),
            home_record: Record::new(40, 20),
            away_record: Record::new(39, 23),
            home_home_record: Record::default(),
            away_away_record: Record::default(),
            line: Line::default(),
        })
    }

    fn team(id: &GameId, abbr: &str, home: bool) -> TeamStats {
        TeamStats {
            game_id: id.clone(),
            team: Team {
                location: None,
                name: abbr.to_string(),
                abbreviation: abbr.to_string(),
            },
            home,
            line: Default::default(),
            q1_pts: 0,
            q2_pts: 0,
            q3_pts: 0,
            q4_pts: 0,
            ot_pts: 0,
            pts_off_to: 0,
            fast_break_pts: 0,
            points_in_paint: 0,
            technical: 0,
            flagrant: 0,
            largest_lead: 0,
            pace: None,
            ft_per_fga: None,
            advanced: Default::default(),
        }
    }

    fn team_stats(id: &GameId) -> Fragment {
        Fragment::TeamStats(TeamStatsPair {
            home: team(id, "MIL", true),
            away: team(id, "BOS", false),
        })
    }

    fn player_stats() -> Fragment {
        Fragment::PlayerStats(PlayerStatsPair::default())
    }

    #[test]
    fn completes_on_third_fragment_in_any_order() {
        let asm = Assembler::new();
        let id = gid("401071116");

        assert!(asm.submit(&id, team_stats(&id)).is_none());
        assert!(asm.submit(&id, player_stats()).is_none());
        assert_eq!(asm.missing(&id), Some(vec![FragmentKind::Game]));

        let record = asm.submit(&id, game(&id)).unwrap();
        assert_eq!(record.game_id(), &id);
        assert_eq!(record.team_stats.home.team.abbreviation, "MIL");
        assert_eq!(record.player_stats.len(), 0);

        let report = asm.report();
        assert_eq!(report.completed, 1);
        assert!(report.pending.is_empty());
    }

    #[test]
    fn duplicate_kind_is_last_write_wins() {
        let asm = Assembler::new();
        let id = gid("1");

        let mut first = team_stats(&id);
        if let Fragment::TeamStats(pair) = &mut first {
            pair.home.team.abbreviation = "NYK".into();
        }
        asm.submit(&id, first);
        asm.submit(&id, team_stats(&id));
        asm.submit(&id, player_stats());
        let record = asm.submit(&id, game(&id)).unwrap();

        assert_eq!(record.team_stats.home.team.abbreviation, "MIL");
        assert_eq!(asm.report().duplicates, 1);
    }

    #[test]
    fn fragment_for_another_game_is_rejected() {
        let asm = Assembler::new();
        let id = gid("1");
        let other = gid("2");

        assert!(asm.submit(&id, team_stats(&other)).is_none());
        assert!(asm.submit(&id, game(&other)).is_none());
        assert_eq!(asm.missing(&id), None);

        asm.submit(&id, team_stats(&id));
        asm.submit(&id, player_stats());
        let record = asm.submit(&id, game(&id)).unwrap();
        assert_eq!(record.team_stats.home.game_id, id);

        let report = asm.report();
        assert_eq!(report.rejected, 2);
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn late_fragments_are_rejected() {
        let asm = Assembler::new();
        let id = gid("1");
        asm.submit(&id, game(&id));
        asm.submit(&id, team_stats(&id));
        assert!(asm.submit(&id, player_stats()).is_some());

        assert!(asm.submit(&id, game(&id)).is_none());
        assert!(asm.submit(&id, player_stats()).is_none());
        let report = asm.report();
        assert_eq!(report.completed, 1);
        assert_eq!(report.rejected, 2);
        assert!(report.pending.is_empty());
    }

    #[test]
    fn pending_games_are_reported() {
        let asm = Assembler::new();
        asm.mark_attempted(&gid("3"));
        asm.submit(&gid("2"), player_stats());
        asm.submit(&gid("1"), game(&gid("1")));

        let report = asm.report();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.completed, 0);
        assert_eq!(report.pending, vec![gid("1"), gid("2")]);
    }

    #[test]
    fn expiry_closes_the_game() {
        let asm = Assembler::new();
        let id = gid("1");
        asm.submit(&id, game(&id));

        assert!(asm.expire(Duration::from_secs(3600)).is_empty());
        assert_eq!(asm.expire(Duration::ZERO), vec![id.clone()]);

        asm.submit(&id, team_stats(&id));
        assert!(asm.submit(&id, player_stats()).is_none());
        let report = asm.report();
        assert_eq!(report.expired, vec![id]);
        assert!(report.pending.is_empty());
        assert_eq!(report.completed, 0);
    }

    #[test]
    fn concurrent_submitters_complete_once() {
        let asm = Arc::new(Assembler::new());
        let id = gid("401071116");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let asm = Arc::clone(&asm);
                let id = id.clone();
                std::thread::spawn(move || {
                    let fragment = match i % 3 {
                        0 => game(&id),
                        1 => team_stats(&id),
                        _ => player_stats(),
                    };
                    asm.submit(&id, fragment).is_some()
                })
            })
            .collect();

        let completions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|done| *done)
            .count();
        assert_eq!(completions, 1);
        assert_eq!(asm.report().completed, 1);
    }
}
