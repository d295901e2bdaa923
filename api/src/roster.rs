//! Canonical player identities for a tournament.
//!
//! Feeds spell names every way imaginable ("Gukesh D", "D. Gukesh",
//! "Dommaraju Gukesh"). The roster maps all of them onto one entry.

use crate::{GameRecord, Player, normalize_name};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRosterEntry {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rating: u16,
    #[serde(default)]
    pub federation: String,
}

impl PlayerRosterEntry {
    fn unmatched(feed_name: &str) -> Self {
        Self { name: feed_name.trim().to_string(), ..Self::default() }
    }
}

/// On-disk roster shape: `{ "players": [...], "aliases": { "feed name": "roster name" } }`.
#[derive(Debug, Deserialize, Default)]
pub struct RosterFile {
    #[serde(default)]
    pub players: Vec<PlayerRosterEntry>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<PlayerRosterEntry>,
    /// normalized full name -> entry index
    by_name: HashMap<String, usize>,
    /// normalized alias -> entry index
    aliases: HashMap<String, usize>,
    /// per-entry normalized tokens, precomputed
    tokens: Vec<Vec<String>>,
}

impl Roster {
    pub fn new(entries: Vec<PlayerRosterEntry>, aliases: HashMap<String, String>) -> Self {
        let by_name: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (normalize_name(&e.name), i))
            .collect();

        let aliases = aliases
            .into_iter()
            .filter_map(|(alias, target)| {
                let idx = by_name.get(&normalize_name(&target)).copied();
                if idx.is_none() {
                    debug!("roster alias {alias:?} points at unknown player {target:?}");
                }
                idx.map(|i| (normalize_name(&alias), i))
            })
            .collect();

        let tokens = entries
            .iter()
            .map(|e| normalize_name(&e.name).split(' ').map(str::to_string).collect())
            .collect();

        Self { entries, by_name, aliases, tokens }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: RosterFile = serde_json::from_str(json)?;
        Ok(Self::new(file.players, file.aliases))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Map a feed-supplied name onto a roster entry. Never fails.
    pub fn reconcile(&self, feed_name: &str) -> PlayerRosterEntry {
        match self.find(feed_name) {
            Some(idx) => self.entries[idx].clone(),
            None => {
                if !self.entries.is_empty() {
                    debug!("roster: no match for feed name {feed_name:?}");
                }
                PlayerRosterEntry::unmatched(feed_name)
            }
        }
    }

    fn find(&self, feed_name: &str) -> Option<usize> {
        let normalized = normalize_name(feed_name);
        if normalized.is_empty() {
            return None;
        }

        if let Some(&idx) = self.aliases.get(&normalized) {
            return Some(idx);
        }

        if let Some(&idx) = self.by_name.get(&normalized) {
            return Some(idx);
        }

        let feed_tokens: Vec<&str> = normalized.split(' ').collect();
        if let Some(idx) = self.partial_match(&feed_tokens) {
            return Some(idx);
        }

        self.containment_match(&feed_tokens)
    }

    /// Last name among the feed tokens and matching first initials; ambiguity falls through.
    fn partial_match(&self, feed_tokens: &[&str]) -> Option<usize> {
        let feed_initial = feed_tokens.first()?.chars().next()?;
        let mut candidates = self.tokens.iter().enumerate().filter(|(_, tokens)| {
            let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
                return false;
            };
            tokens.len() > 1
                && feed_tokens.contains(&last.as_str())
                && first.chars().next() == Some(feed_initial)
        });

        let (idx, _) = candidates.next()?;
        if candidates.next().is_some() {
            debug!("roster: ambiguous partial match for {:?}", feed_tokens.join(" "));
            return None;
        }
        Some(idx)
    }

    /// Every roster token is one of the feed's words. Single-letter tokens
    /// (initials) only need to start one. Ambiguity falls through.
    fn containment_match(&self, feed_tokens: &[&str]) -> Option<usize> {
        let mut candidates = self.tokens.iter().enumerate().filter(|(_, tokens)| {
            !tokens.is_empty()
                && tokens.iter().all(|token| {
                    if token.chars().count() == 1 {
                        feed_tokens.iter().any(|f| f.starts_with(token.as_str()))
                    } else {
                        feed_tokens.contains(&token.as_str())
                    }
                })
        });

        let (idx, _) = candidates.next()?;
        if candidates.next().is_some() {
            debug!("roster: ambiguous containment match for {:?}", feed_tokens.join(" "));
            return None;
        }
        Some(idx)
    }

    /// Rename both players to their roster spelling and fill empty metadata.
    /// Feed-supplied metadata wins.
    pub fn apply(&self, game: &mut GameRecord) {
        if self.entries.is_empty() {
            return;
        }
        let white = self.reconcile(&game.white.name);
        apply_entry(&mut game.white, &white);
        let black = self.reconcile(&game.black.name);
        apply_entry(&mut game.black, &black);
    }
}

fn apply_entry(player: &mut Player, entry: &PlayerRosterEntry) {
    if !entry.name.is_empty() {
        player.name = entry.name.clone();
    }
    if player.title.is_empty() {
        player.title = entry.title.clone();
    }
    if player.rating == 0 {
        player.rating = entry.rating;
    }
    if player.federation.is_empty() {
        player.federation = entry.federation.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::from_json(
            r#"{
                "players": [
                    {"name": "Gukesh D", "title": "GM", "rating": 2783, "federation": "IND"},
                    {"name": "Praggnanandhaa R", "title": "GM", "rating": 2741, "federation": "IND"},
                    {"name": "Magnus Carlsen", "title": "GM", "rating": 2837, "federation": "NOR"},
                    {"name": "Hikaru Nakamura", "title": "GM", "rating": 2804, "federation": "USA"},
                    {"name": "Wei Yi", "title": "GM", "rating": 2753, "federation": "CHN"},
                    {"name": "Wesley So", "title": "GM", "rating": 2745, "federation": "USA"},
                    {"name": "Anish Giri", "title": "GM", "rating": 2732, "federation": "NED"},
                    {"name": "Arjun Giri", "title": "IM", "rating": 2450, "federation": "IND"}
                ],
                "aliases": {"Pragg": "Praggnanandhaa R"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn gukesh_spellings_collapse_to_one_entry() {
        let roster = roster();
        let a = roster.reconcile("Gukesh D");
        let b = roster.reconcile("D. Gukesh");
        let c = roster.reconcile("Dommaraju Gukesh");
        assert_eq!(a.name, "Gukesh D");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.rating, 2783);
    }

    #[test]
    fn alias_table_wins_first() {
        assert_eq!(roster().reconcile("pragg").name, "Praggnanandhaa R");
    }

    #[test]
    fn surname_first_and_initialed_names_match() {
        let roster = roster();
        assert_eq!(roster.reconcile("Carlsen, Magnus").federation, "NOR");
        assert_eq!(roster.reconcile("M. Carlsen").federation, "NOR");
    }

    #[test]
    fn ambiguous_partial_match_falls_through() {
        // Both Giris share the initial A and the surname.
        let roster = roster();
        let entry = roster.reconcile("A Giri");
        assert_eq!(entry.name, "A Giri");
        assert_eq!(entry.rating, 0);
    }

    #[test]
    fn middle_initial_still_matches() {
        assert_eq!(roster().reconcile("Hikaru J. Nakamura").rating, 2804);
    }

    #[test]
    fn unmatched_name_is_trimmed_fallback() {
        let entry = roster().reconcile("  Unknown Player ");
        assert_eq!(
            entry,
            PlayerRosterEntry { name: "Unknown Player".into(), ..Default::default() }
        );
    }

    #[test]
    fn apply_keeps_feed_metadata() {
        let roster = roster();
        let mut game = GameRecord::new(1, 1, "Carlsen, Magnus", "So, Wesley");
        game.white.rating = 2840;
        roster.apply(&mut game);
        assert_eq!(game.white.rating, 2840);
        assert_eq!(game.white.title, "GM");
        assert_eq!(game.black.federation, "USA");
        assert_eq!(game.white.name, "Magnus Carlsen");
        assert_eq!(game.black.name, "Wesley So");
    }

    #[test]
    fn spellings_from_different_feeds_share_a_row_key() {
        let roster = roster();
        let mut official = GameRecord::new(4, 2, "Dommaraju Gukesh", "So, Wesley");
        let mut lichess = GameRecord::new(4, 2, "Gukesh D", "Wesley So");
        roster.apply(&mut official);
        roster.apply(&mut lichess);
        assert_eq!(official.row_key(), lichess.row_key());
        assert_eq!(official.white.name, "Gukesh D");
    }

    #[test]
    fn containment_needs_whole_words() {
        let entry = roster().reconcile("Wesley Sokolov");
        assert_eq!(entry.name, "Wesley Sokolov");
        assert_eq!(entry.rating, 0);
    }

    #[test]
    fn ambiguous_containment_falls_through() {
        let roster = Roster::new(
            vec![
                PlayerRosterEntry { name: "Li Chao".into(), rating: 2700, ..Default::default() },
                PlayerRosterEntry { name: "Chao Li".into(), rating: 2650, ..Default::default() },
            ],
            HashMap::new(),
        );
        // Exact match still resolves.
        assert_eq!(roster.reconcile("Li Chao").rating, 2700);
        assert_eq!(roster.reconcile("B Li Chao").rating, 0);
    }
}
