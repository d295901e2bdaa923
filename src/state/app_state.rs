use crate::state::round_select::{RoundSelectionState, RoundSelector, StatusColor, summarize_rounds};
use broadcast_api::feed::FeedSource;
use broadcast_api::schedule::LiveStatus;
use broadcast_api::{GameRecord, TournamentInfo};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Per-round view
// ---------------------------------------------------------------------------

/// Where the games currently shown for a round came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundMeta {
    pub source: FeedSource,
    pub stale: bool,
    pub round_id: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Root app state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub info: Option<TournamentInfo>,
    /// Last live-status probe; `None` until the first probe succeeds.
    pub probe: Option<LiveStatus>,
    pub rounds: BTreeMap<u32, Vec<GameRecord>>,
    pub meta: BTreeMap<u32, RoundMeta>,
    pub selector: RoundSelector,
    pub selection: RoundSelectionState,
    pub paused: bool,
    pub last_error: Option<String>,
}

impl AppState {
    pub fn new(initial_round: Option<u32>) -> Self {
        let selector = RoundSelector::with_initial(initial_round);
        let selection = selector.evaluate(&LiveStatus::default(), Utc::now().timestamp_millis());
        Self {
            info: None,
            probe: None,
            rounds: BTreeMap::new(),
            meta: BTreeMap::new(),
            selector,
            selection,
            paused: false,
            last_error: None,
        }
    }

    pub fn selected_round(&self) -> u32 {
        self.selection.selected_round
    }

    pub fn games(&self, round: u32) -> &[GameRecord] {
        self.rounds.get(&round).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every upstream round ID seen for this tournament, from loads and metadata.
    pub fn known_round_ids(&self) -> Vec<String> {
        let loaded = self.meta.values().filter_map(|m| m.round_id.clone());
        let listed = self.info.iter().flat_map(|info| info.rounds.iter().map(|r| r.id.clone()));
        let mut ids: Vec<String> = loaded.chain(listed).filter(|id| !id.is_empty()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn round_id(&self, round: u32) -> Option<String> {
        self.meta
            .get(&round)
            .and_then(|m| m.round_id.clone())
            .or_else(|| self.info.as_ref()?.round(round).map(|r| r.id.clone()))
    }

    pub fn live_status(&self, now: DateTime<Utc>) -> LiveStatus {
        summarize_rounds(self.probe.as_ref(), self.info.as_ref(), &self.rounds, now)
    }

    /// Every game of the round has a result.
    pub fn round_finished(&self, round: u32) -> bool {
        let games = self.games(round);
        !games.is_empty() && games.iter().all(GameRecord::is_finished)
    }

    pub fn is_live(&self) -> bool {
        self.selection.status_color == StatusColor::Red
    }

    /// Recompute the selection from everything known; returns true when the
    /// selected round changed.
    pub fn reevaluate(&mut self, now: DateTime<Utc>) -> bool {
        let status = self.live_status(now);
        let previous = self.selection.selected_round;
        self.selection = self.selector.evaluate(&status, now.timestamp_millis());
        previous != self.selection.selected_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcast_api::GameResult;
    use broadcast_api::RoundInfo;

    #[test]
    fn round_id_prefers_loaded_round() {
        let mut state = AppState::new(None);
        state.info = Some(TournamentInfo {
            id: "tour".into(),
            rounds: vec![RoundInfo { number: 2, id: "r2-meta".into(), ..Default::default() }],
            ..Default::default()
        });
        assert_eq!(state.round_id(2).as_deref(), Some("r2-meta"));
        assert_eq!(state.round_id(3), None);

        state.meta.insert(
            2,
            RoundMeta {
                source: FeedSource::Broadcast,
                stale: false,
                round_id: Some("r2-feed".into()),
                loaded_at: Utc::now(),
            },
        );
        assert_eq!(state.round_id(2).as_deref(), Some("r2-feed"));
        assert_eq!(state.known_round_ids(), vec!["r2-feed".to_string(), "r2-meta".to_string()]);
    }

    #[test]
    fn finished_round_needs_every_result() {
        let mut state = AppState::new(Some(4));
        assert_eq!(state.selected_round(), 4);
        assert!(!state.round_finished(4));

        let mut done = GameRecord::new(4, 1, "A", "B");
        done.finish(GameResult::BlackWins);
        let pending = GameRecord::new(4, 2, "C", "D");
        state.rounds.insert(4, vec![done.clone(), pending]);
        assert!(!state.round_finished(4));

        state.rounds.insert(4, vec![done]);
        assert!(state.round_finished(4));
    }
}
