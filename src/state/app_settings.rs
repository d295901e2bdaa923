use crate::cache::keys::canonical_key;
use broadcast_api::client::LICHESS_BASE;
use broadcast_api::feed::FeedConfig;
use log::LevelFilter;
use std::path::PathBuf;

pub const DEFAULT_CACHE_DIR: &str = ".boardcast-cache";

#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Canonical key used for every cache entry and de-duplication.
    pub tournament_key: String,
    pub broadcast_id: Option<String>,
    pub official_template: Option<String>,
    pub roster_path: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub api_base: String,
    pub min_boards: usize,
    pub initial_round: Option<u32>,
    pub log_level: LevelFilter,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tournament_key: String::new(),
            broadcast_id: None,
            official_template: None,
            roster_path: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            api_base: LICHESS_BASE.to_string(),
            min_boards: 1,
            initial_round: None,
            log_level: LevelFilter::Info,
        }
    }
}

impl AppSettings {
    pub fn load() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let broadcast_id = var("BOARDCAST_TOURNAMENT");
        let slug = var("BOARDCAST_SLUG").or_else(|| broadcast_id.clone()).unwrap_or_default();

        Self {
            tournament_key: canonical_key(&slug),
            broadcast_id,
            official_template: var("BOARDCAST_OFFICIAL_PGN").filter(|t| t.contains("{round}")),
            roster_path: var("BOARDCAST_ROSTER").map(PathBuf::from),
            cache_dir: var("BOARDCAST_CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            api_base: var("BOARDCAST_API_BASE").unwrap_or(defaults.api_base),
            min_boards: var("BOARDCAST_MIN_BOARDS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.min_boards),
            initial_round: var("BOARDCAST_ROUND").and_then(|v| v.parse().ok()).filter(|r| *r > 0),
            log_level: var("BOARDCAST_LOG")
                .or_else(|| var("RUST_LOG"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_level),
        }
    }

    pub fn has_source(&self) -> bool {
        self.broadcast_id.is_some() || self.official_template.is_some()
    }

    pub fn feed_config(&self) -> FeedConfig {
        let mut config = FeedConfig::new(self.tournament_key.clone());
        config.broadcast_id = self.broadcast_id.clone();
        config.official_template = self.official_template.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> AppSettings {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]);
        assert_eq!(s.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(s.api_base, LICHESS_BASE);
        assert_eq!(s.min_boards, 1);
        assert_eq!(s.log_level, LevelFilter::Info);
        assert!(!s.has_source());
    }

    #[test]
    fn slug_defaults_to_broadcast_id_and_is_canonical() {
        let s = settings(&[("BOARDCAST_TOURNAMENT", "Ab12Cd34")]);
        assert_eq!(s.tournament_key, "ab12cd34");
        let s = settings(&[("BOARDCAST_TOURNAMENT", "x"), ("BOARDCAST_SLUG", "Tata Steel Masters")]);
        assert_eq!(s.tournament_key, "tata-steel-masters");
        assert_eq!(s.feed_config().broadcast_id.as_deref(), Some("x"));
    }

    #[test]
    fn invalid_values_fall_back() {
        let s = settings(&[
            ("BOARDCAST_MIN_BOARDS", "zero"),
            ("BOARDCAST_ROUND", "0"),
            ("BOARDCAST_OFFICIAL_PGN", "https://example.org/live.pgn"),
            ("BOARDCAST_LOG", "debug"),
        ]);
        assert_eq!(s.min_boards, 1);
        assert_eq!(s.initial_round, None);
        assert_eq!(s.official_template, None, "template without {{round}} is ignored");
        assert_eq!(s.log_level, LevelFilter::Debug);
    }
}
