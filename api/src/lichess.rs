//! Lichess broadcast API wire types, deserialized as-is.
//! These map to the clean domain types via the `map_*` functions in client.rs.
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Tournament metadata  (/api/broadcast/{tourId})
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BroadcastTournamentResponse {
    pub tour: Option<BroadcastTour>,
    #[serde(default)]
    pub rounds: Vec<BroadcastRoundInfo>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BroadcastTour {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRoundInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub url: Option<String>,
    /// Seconds or milliseconds depending on the endpoint revision.
    pub starts_at: Option<i64>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub ongoing: bool,
}

// ---------------------------------------------------------------------------
// Round  (/api/broadcast/-/-/{roundId})
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BroadcastRoundResponse {
    pub round: Option<BroadcastRoundInfo>,
    pub tour: Option<BroadcastTour>,
    #[serde(default)]
    pub games: Vec<BroadcastGame>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastGame {
    pub id: String,
    pub name: Option<String>,
    pub fen: Option<String>,
    #[serde(default)]
    pub players: Vec<BroadcastPlayer>,
    pub last_move: Option<String>,
    /// `"*"` while in progress, otherwise a result token such as `"1-0"` or `"½-½"`.
    pub status: Option<String>,
    pub think_time: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BroadcastPlayer {
    #[serde(default)]
    pub name: String,
    pub title: Option<String>,
    pub rating: Option<u16>,
    pub fed: Option<String>,
    /// Remaining time in centiseconds.
    pub clock: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_json_deserializes_with_missing_fields() {
        let raw: BroadcastRoundResponse = serde_json::from_str(
            r#"{
                "round": {"id": "r7", "name": "Round 7", "startsAt": 1767000000000},
                "games": [
                    {"id": "g1", "fen": "8/8/8/8/8/8/8/8 w - - 0 1", "lastMove": "e2e4",
                     "status": "*",
                     "players": [{"name": "A", "rating": 2700, "clock": 360000}, {"name": "B"}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(raw.round.unwrap().starts_at, Some(1_767_000_000_000));
        assert_eq!(raw.games[0].last_move.as_deref(), Some("e2e4"));
        assert_eq!(raw.games[0].players[0].clock, Some(360_000));
        assert_eq!(raw.games[0].players[1].rating, None);
    }
}
