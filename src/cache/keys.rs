//! Persisted-store key layout. Every key is built from a canonical tournament key.

/// Lowercase slug with runs of non-alphanumerics collapsed to a single `-`.
pub fn canonical_key(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut pending_dash = false;
    for ch in slug.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

pub fn preview_fen_cache(tournament_key: &str, round: u32) -> String {
    format!("previewFenCache:{tournament_key}:{round}")
}

pub fn preview_fen_cache_prefix(tournament_key: &str) -> String {
    format!("previewFenCache:{tournament_key}:")
}

/// Mirror of a round's previews under the upstream round ID.
pub fn preview_fen_by_round(round_id: &str) -> String {
    format!("previewFenByRound:{round_id}")
}

/// Last merged view of a round, served when every feed is down.
pub fn round_ui_cache(tournament_slug: &str, round: u32) -> String {
    format!("ROUND_UI_CACHE:{tournament_slug}:{round}")
}

pub fn round_ui_cache_prefix(tournament_slug: &str) -> String {
    format!("ROUND_UI_CACHE:{tournament_slug}:")
}

/// Per-round baselines of a tournament.
pub fn tournament_games_cache(tournament_slug: &str) -> String {
    format!("tournament_games_cache_{tournament_slug}_v3")
}
