use std::cmp::Ordering;

use indexmap::IndexMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::state::{error::SessionError, sequencer::QuestionId};

/// Opaque authenticated player identity.
pub type PlayerId = String;

/// One accepted answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnsweredQuestion {
    /// Question answered.
    pub question_id: QuestionId,
    /// Whether the answer was correct.
    pub correct: bool,
    /// When the answer was accepted.
    pub at: OffsetDateTime,
}

/// Player membership, liveness and race progress inside one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Authenticated identity.
    pub id: PlayerId,
    /// Session this player belongs to.
    pub session_id: Uuid,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Lobby readiness.
    pub ready: bool,
    /// When the player joined.
    pub joined_at: OffsetDateTime,
    /// Last heartbeat.
    pub last_seen: OffsetDateTime,
    /// False once the heartbeat went stale.
    pub active: bool,
    /// Set when the player left after the race started; score is frozen.
    pub left: bool,
    /// Running score.
    pub score: u32,
    /// Index of the current question in `sequence`.
    pub cursor: usize,
    /// Questions assigned at race start.
    pub sequence: Vec<QuestionId>,
    /// When the player answered their last question.
    pub finished_at: Option<OffsetDateTime>,
    /// Accepted answers in order.
    pub answers: Vec<AnsweredQuestion>,
}

impl Player {
    /// Fresh lobby member.
    pub fn new(id: PlayerId, session_id: Uuid, display_name: String, now: OffsetDateTime) -> Self {
        Self {
            id,
            session_id,
            display_name,
            ready: false,
            joined_at: now,
            last_seen: now,
            active: true,
            left: false,
            score: 0,
            cursor: 0,
            sequence: Vec::new(),
            finished_at: None,
            answers: Vec::new(),
        }
    }

    /// Question the player must answer next, if any.
    pub fn current_question(&self) -> Option<&QuestionId> {
        if self.left {
            return None;
        }
        self.sequence.get(self.cursor)
    }

    /// Whether the player has answered their whole sequence.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Whether the player still takes part in the race.
    pub fn is_racing(&self) -> bool {
        self.active && !self.left
    }
}

/// Per-session player table, kept in join order.
#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: IndexMap<PlayerId, Player>,
}

impl PlayerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player, refusing duplicates.
    pub fn add(&mut self, player: Player) -> Result<(), SessionError> {
        if self.players.contains_key(&player.id) {
            return Err(SessionError::DuplicateJoin(player.id));
        }
        self.players.insert(player.id.clone(), player);
        Ok(())
    }

    /// Delete a player entirely (lobby only).
    pub fn remove(&mut self, id: &str) -> Result<Player, SessionError> {
        self.players
            .shift_remove(id)
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_string()))
    }

    /// Freeze a player's result without deleting their history. Returns the frozen score.
    pub fn retire(&mut self, id: &str) -> Result<u32, SessionError> {
        let player = self.get_mut(id)?;
        player.left = true;
        player.ready = false;
        Ok(player.score)
    }

    /// Record a heartbeat. Returns `true` when it brought an inactive player back.
    pub fn touch(&mut self, id: &str, now: OffsetDateTime) -> Result<bool, SessionError> {
        let player = self.get_mut(id)?;
        player.last_seen = now;
        let revived = !player.active;
        player.active = true;
        Ok(revived)
    }

    /// Set readiness, returning the previous value.
    pub fn set_ready(&mut self, id: &str, ready: bool) -> Result<bool, SessionError> {
        let player = self.get_mut(id)?;
        let before = player.ready;
        player.ready = ready;
        Ok(before)
    }

    /// Borrow a player.
    pub fn get(&self, id: &str) -> Result<&Player, SessionError> {
        self.players
            .get(id)
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_string()))
    }

    /// Mutably borrow a player.
    pub fn get_mut(&mut self, id: &str) -> Result<&mut Player, SessionError> {
        self.players
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_string()))
    }

    /// All players in join order.
    pub fn list(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub(crate) fn list_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    /// Number of registered players.
    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Mark every active player whose heartbeat is older than `threshold` as inactive.
    /// Returns the ids that changed.
    pub fn mark_stale(&mut self, now: OffsetDateTime, threshold: Duration) -> Vec<PlayerId> {
        self.players
            .values_mut()
            .filter(|player| player.active && !player.left && now - player.last_seen > threshold)
            .map(|player| {
                player.active = false;
                player.id.clone()
            })
            .collect()
    }

    /// Explain why the lobby cannot start yet, or `None` when it can.
    pub fn quorum_blocker(&self) -> Option<String> {
        if self.players.len() < 2 {
            return Some(format!(
                "at least 2 players are required, {} joined",
                self.players.len()
            ));
        }
        if let Some(player) = self.players.values().find(|player| !player.active) {
            return Some(format!("player `{}` is inactive", player.id));
        }
        self.players
            .values()
            .find(|player| !player.ready)
            .map(|player| format!("player `{}` is not ready", player.id))
    }

    /// Whether at least one player is still racing and every such player has exhausted
    /// their sequence. With nobody active the race stays open for the TTL or the host.
    pub fn all_racing_finished(&self) -> bool {
        let mut racing = self
            .players
            .values()
            .filter(|player| player.is_racing())
            .peekable();
        racing.peek().is_some() && racing.all(Player::is_finished)
    }

    /// Players ranked by score, then earliest finish, then join order.
    pub fn leaderboard(&self) -> Vec<&Player> {
        let mut ranked: Vec<&Player> = self.players.values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| compare_finish(a.finished_at, b.finished_at))
                .then_with(|| a.joined_at.cmp(&b.joined_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }
}

fn compare_finish(a: Option<OffsetDateTime>, b: Option<OffsetDateTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds)
    }

    fn player(id: &str, joined: i64) -> Player {
        Player::new(id.into(), Uuid::nil(), id.to_uppercase(), at(joined))
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let mut registry = PlayerRegistry::new();
        registry.add(player("a", 0)).unwrap();
        let err = registry.add(player("a", 1)).unwrap_err();
        assert_eq!(err, SessionError::DuplicateJoin("a".into()));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unknown_players_are_reported() {
        let mut registry = PlayerRegistry::new();
        assert_eq!(
            registry.set_ready("ghost", true).unwrap_err(),
            SessionError::UnknownPlayer("ghost".into())
        );
        assert!(registry.remove("ghost").is_err());
    }

    #[test]
    fn retire_keeps_history_and_freezes_score() {
        let mut registry = PlayerRegistry::new();
        let mut p = player("a", 0);
        p.score = 3;
        p.sequence = vec!["q1".into()];
        registry.add(p).unwrap();

        assert_eq!(registry.retire("a").unwrap(), 3);
        let p = registry.get("a").unwrap();
        assert!(p.left);
        assert_eq!(p.current_question(), None);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn race_completion_needs_someone_still_racing() {
        let mut registry = PlayerRegistry::new();
        registry.add(player("a", 0)).unwrap();
        registry.add(player("b", 0)).unwrap();
        for p in registry.list_mut() {
            p.sequence = vec!["q1".into()];
        }

        registry.mark_stale(at(100), Duration::seconds(60));
        assert!(!registry.all_racing_finished());

        registry.touch("a", at(101)).unwrap();
        assert!(!registry.all_racing_finished());
        registry.get_mut("a").unwrap().finished_at = Some(at(102));
        assert!(registry.all_racing_finished());
    }

    #[test]
    fn stale_players_become_inactive_and_heartbeat_revives_them() {
        let mut registry = PlayerRegistry::new();
        registry.add(player("a", 0)).unwrap();
        registry.add(player("b", 50)).unwrap();

        let stale = registry.mark_stale(at(100), Duration::seconds(60));
        assert_eq!(stale, vec!["a".to_string()]);
        assert!(!registry.get("a").unwrap().active);
        assert!(registry.mark_stale(at(100), Duration::seconds(60)).is_empty());

        assert!(registry.touch("a", at(101)).unwrap());
        assert!(!registry.touch("a", at(102)).unwrap());
        assert!(registry.get("a").unwrap().active);
    }

    #[test]
    fn quorum_needs_two_active_ready_players() {
        let mut registry = PlayerRegistry::new();
        registry.add(player("a", 0)).unwrap();
        registry.set_ready("a", true).unwrap();
        assert!(registry.quorum_blocker().is_some());

        registry.add(player("b", 1)).unwrap();
        assert!(registry.quorum_blocker().unwrap().contains("`b` is not ready"));

        registry.set_ready("b", true).unwrap();
        assert_eq!(registry.quorum_blocker(), None);

        registry.get_mut("b").unwrap().active = false;
        assert!(registry.quorum_blocker().unwrap().contains("inactive"));
    }

    #[test]
    fn leaderboard_breaks_ties_on_finish_time() {
        let mut registry = PlayerRegistry::new();
        let mut a = player("a", 0);
        a.score = 2;
        a.finished_at = Some(at(30));
        let mut b = player("b", 1);
        b.score = 2;
        b.finished_at = Some(at(20));
        let mut c = player("c", 2);
        c.score = 2;
        let mut d = player("d", 3);
        d.score = 5;
        for p in [a, b, c, d] {
            registry.add(p).unwrap();
        }

        let order: Vec<&str> = registry
            .leaderboard()
            .into_iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(order, vec!["d", "b", "a", "c"]);
    }
}
