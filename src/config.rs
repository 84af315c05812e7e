//! Application-level configuration loading: identity pools and game timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::state::party::PlayerColor;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONGCLASH_CONFIG_PATH";

const DEFAULT_RECONNECT_WINDOW: Duration = Duration::from_secs(300);
const DEFAULT_VOTE_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_FINALE_STEP_DELAY: Duration = Duration::from_millis(4_000);
const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_MAX_PLAYERS: usize = 12;
const DEFAULT_SUPER_VOTE_COST: u32 = 2;
const DEFAULT_STARTING_POINTS: u32 = 4;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    aliases: Vec<String>,
    silhouettes: Vec<String>,
    colors: Vec<PlayerColor>,
    reconnect_window: Duration,
    vote_grace: Duration,
    finale_step_delay: Duration,
    persist_timeout: Duration,
    max_players: usize,
    super_vote_cost: u32,
    starting_power_up_points: u32,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        aliases = app_config.aliases.len(),
                        colors = app_config.colors.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Alias pool for anonymous identities.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Silhouette pool for anonymous identities.
    pub fn silhouettes(&self) -> &[String] {
        &self.silhouettes
    }

    /// Color pool for anonymous identities.
    pub fn colors(&self) -> &[PlayerColor] {
        &self.colors
    }

    /// How long a disconnected player may take to come back.
    pub fn reconnect_window(&self) -> Duration {
        self.reconnect_window
    }

    /// Listening time added to a song's play duration before it is force-advanced.
    pub fn vote_grace(&self) -> Duration {
        self.vote_grace
    }

    /// Pause between two automatic finale reveal steps.
    pub fn finale_step_delay(&self) -> Duration {
        self.finale_step_delay
    }

    /// Upper bound for a single persistence round-trip.
    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    /// Maximum number of players in a party, host included.
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Power-up points spent by a super vote.
    pub fn super_vote_cost(&self) -> u32 {
        self.super_vote_cost
    }

    /// Power-up points every player starts with.
    pub fn starting_power_up_points(&self) -> u32 {
        self.starting_power_up_points
    }

    /// Replace the alias pool.
    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Replace the reconnection window.
    pub fn with_reconnect_window(mut self, window: Duration) -> Self {
        self.reconnect_window = window;
        self
    }

    /// Replace the finale step delay.
    pub fn with_finale_step_delay(mut self, delay: Duration) -> Self {
        self.finale_step_delay = delay;
        self
    }

    /// Replace the player cap.
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            silhouettes: default_silhouettes(),
            colors: default_colors(),
            reconnect_window: DEFAULT_RECONNECT_WINDOW,
            vote_grace: DEFAULT_VOTE_GRACE,
            finale_step_delay: DEFAULT_FINALE_STEP_DELAY,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            max_players: DEFAULT_MAX_PLAYERS,
            super_vote_cost: DEFAULT_SUPER_VOTE_COST,
            starting_power_up_points: DEFAULT_STARTING_POINTS,
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
/// Every key is optional.
struct RawConfig {
    aliases: Option<Vec<String>>,
    silhouettes: Option<Vec<String>>,
    colors: Option<Vec<RawColor>>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    reconnect_window_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    vote_grace_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    finale_step_delay_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    persist_timeout_ms: Option<Duration>,
    max_players: Option<usize>,
    super_vote_cost: Option<u32>,
    starting_power_up_points: Option<u32>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            aliases: non_empty(value.aliases).unwrap_or(defaults.aliases),
            silhouettes: non_empty(value.silhouettes).unwrap_or(defaults.silhouettes),
            colors: non_empty(value.colors)
                .map(|colors| colors.into_iter().map(Into::into).collect())
                .unwrap_or(defaults.colors),
            reconnect_window: value.reconnect_window_secs.unwrap_or(defaults.reconnect_window),
            vote_grace: value.vote_grace_secs.unwrap_or(defaults.vote_grace),
            finale_step_delay: value
                .finale_step_delay_ms
                .unwrap_or(defaults.finale_step_delay),
            persist_timeout: value.persist_timeout_ms.unwrap_or(defaults.persist_timeout),
            max_players: value.max_players.unwrap_or(defaults.max_players),
            super_vote_cost: value.super_vote_cost.unwrap_or(defaults.super_vote_cost),
            starting_power_up_points: value
                .starting_power_up_points
                .unwrap_or(defaults.starting_power_up_points),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single HSV entry inside the configuration file.
struct RawColor {
    hue: f32,
    saturation: f32,
    value: f32,
}

impl From<RawColor> for PlayerColor {
    fn from(value: RawColor) -> Self {
        Self {
            h: value.hue,
            s: value.saturation,
            v: value.value,
        }
    }
}

fn non_empty<T>(values: Option<Vec<T>>) -> Option<Vec<T>> {
    values.filter(|values| !values.is_empty())
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_aliases() -> Vec<String> {
    [
        "Velvet Fox",
        "Neon Owl",
        "Disco Yeti",
        "Midnight Llama",
        "Funky Otter",
        "Cosmic Heron",
        "Bass Badger",
        "Echo Lynx",
        "Vinyl Moth",
        "Synth Walrus",
        "Groove Gecko",
        "Tempo Toucan",
        "Riff Raccoon",
        "Lo-Fi Panda",
        "Reverb Raven",
        "Jazz Jaguar",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_silhouettes() -> Vec<String> {
    [
        "headphones",
        "microphone",
        "guitar",
        "cassette",
        "vinyl",
        "trumpet",
        "drum",
        "saxophone",
        "keyboard",
        "boombox",
        "violin",
        "maracas",
        "tambourine",
        "harmonica",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Built-in HSV palette shipped with the binary.
fn default_colors() -> Vec<PlayerColor> {
    [
        (-64.69388, 1.0),
        (119.331474, 1.0),
        (-113.57562, 1.0),
        (34.365788, 1.0),
        (-169.41148, 1.0),
        (-19.08323, 1.0),
        (58.87927, 1.0),
        (-134.34782, 0.6),
        (153.15997, 0.6),
        (-37.933628, 0.6),
        (-90.79761, 0.6),
        (44.579124, 0.6),
        (-2.2399259, 0.6),
        (-178.32115, 0.6),
        (-148.47302, 1.0),
        (12.806246, 1.0),
    ]
    .into_iter()
    .map(|(h, s)| PlayerColor { h, s, v: 1.0 })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "reconnect_window_secs": 60, "finale_step_delay_ms": 250 }"#)
                .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.reconnect_window(), Duration::from_secs(60));
        assert_eq!(config.finale_step_delay(), Duration::from_millis(250));
        assert_eq!(config.vote_grace(), DEFAULT_VOTE_GRACE);
        assert_eq!(config.max_players(), DEFAULT_MAX_PLAYERS);
        assert_eq!(config.aliases().len(), default_aliases().len());
    }

    #[test]
    fn custom_pools_replace_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "aliases": ["A", "B"],
                "colors": [{ "hue": 10.0, "saturation": 0.5, "value": 1.0 }]
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.aliases(), ["A".to_string(), "B".to_string()]);
        assert_eq!(config.colors().len(), 1);
        assert_eq!(config.colors()[0].s, 0.5);
    }

    #[test]
    fn default_pools_cover_max_players() {
        let config = AppConfig::default();
        assert!(config.aliases().len() >= config.max_players());
        assert!(config.silhouettes().len() >= config.max_players());
        assert!(config.colors().len() >= config.max_players());
    }
}
