// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Game activity detection
//!
//! Decides whether the FPS gauge should be shown. The detector takes the FPS
//! value and GPU usage as per-tick inputs and asks a [`ForegroundProbe`] about
//! the foreground window; everything else is pure scoring.
//!
//! In auto-detect mode, a positive FPS value short-circuits to "detected".
//! Otherwise independent signals add a fixed weight each:
//!
//! | Signal | Weight |
//! |---|---|
//! | foreground window covers its whole monitor | 0.6 |
//! | GPU usage at or above the threshold for the whole window | 0.3 |
//! | foreground process is a known game | 0.5 |
//!
//! A score of 0.5 or more counts as detected.

use crate::backend::HistoryBuffer;
use serde::{Deserialize, Serialize};

pub const FULLSCREEN_WEIGHT: f32 = 0.6;
pub const SUSTAINED_GPU_WEIGHT: f32 = 0.3;
pub const KNOWN_GAME_WEIGHT: f32 = 0.5;
pub const DETECTION_THRESHOLD: f32 = 0.5;

/// Known-game entries shorter than this only match a process name exactly
const MIN_SUBSTRING_MATCH_LEN: usize = 6;

/// Executables (without `.exe`) treated as games
const KNOWN_GAMES: &[&str] = &[
    "cs2",
    "csgo",
    "dota2",
    "valorant",
    "valorant-win64-shipping",
    "fortniteclient-win64-shipping",
    "r5apex",
    "overwatch",
    "leagueoflegends",
    "league of legends",
    "eldenring",
    "cyberpunk2077",
    "witcher3",
    "rdr2",
    "gta5",
    "gtav",
    "minecraft",
    "rocketleague",
    "destiny2",
    "modernwarfare",
    "blackops",
    "pubg",
    "tslgame",
    "starfield",
    "baldursgate3",
    "bg3",
    "bg3_dx11",
    "hogwartslegacy",
    "helldivers2",
    "palworld",
    "rainbowsix",
    "rustclient",
    "eafc",
    "fifa",
    "wow",
    "diablo iv",
    "forzahorizon5",
    "forza",
];

/// How the FPS gauge decides whether to show
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameDisplayMode {
    #[default]
    AutoDetect,
    AlwaysShow,
    AlwaysHide,
}

/// What the OS reports about the foreground window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundWindow {
    /// Executable file name of the owning process, if it could be resolved
    pub process_name: Option<String>,
    /// Window rectangle exactly covers its monitor
    pub is_fullscreen: bool,
}

/// Foreground window introspection
///
/// Best effort: any OS failure is reported as `None`.
pub trait ForegroundProbe {
    fn foreground(&self) -> Option<ForegroundWindow>;
}

/// The three auto-detect signals for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySignals {
    pub fullscreen: bool,
    pub sustained_gpu: bool,
    pub known_game: bool,
}

/// Weighted score of the auto-detect signals
pub fn activity_score(signals: &ActivitySignals) -> f32 {
    let mut score = 0.0;
    if signals.fullscreen {
        score += FULLSCREEN_WEIGHT;
    }
    if signals.sustained_gpu {
        score += SUSTAINED_GPU_WEIGHT;
    }
    if signals.known_game {
        score += KNOWN_GAME_WEIGHT;
    }
    score
}

/// Number of ticks needed to cover `window_ms`
pub fn sustained_sample_count(window_ms: u32, tick_interval_ms: u32) -> usize {
    let tick = tick_interval_ms.max(1);
    (window_ms.div_ceil(tick) as usize).max(1)
}

fn has_fps(fps: Option<f32>) -> bool {
    matches!(fps, Some(value) if value > 0.0)
}

/// Game activity detector
pub struct GameActivityDetector {
    mode: GameDisplayMode,
    gpu_threshold: f32,
    gpu_history: HistoryBuffer<f32>,
    known_games: Vec<String>,
    probe: Option<Box<dyn ForegroundProbe>>,
    last_detected: bool,
    last_score: f32,
}

impl GameActivityDetector {
    /// Create a detector whose sustained-usage window covers `sustained_window_ms`
    /// at the given tick interval
    pub fn new(
        mode: GameDisplayMode,
        tick_interval_ms: u32,
        sustained_window_ms: u32,
        gpu_threshold: f32,
        probe: Option<Box<dyn ForegroundProbe>>,
    ) -> Self {
        let window = sustained_sample_count(sustained_window_ms, tick_interval_ms);
        log::debug!(
            "Game detection: mode {:?}, sustained window {} ticks at >= {}%",
            mode,
            window,
            gpu_threshold
        );

        Self {
            mode,
            gpu_threshold,
            gpu_history: HistoryBuffer::new(window),
            known_games: KNOWN_GAMES.iter().map(|s| s.to_string()).collect(),
            probe,
            last_detected: false,
            last_score: 0.0,
        }
    }

    /// Add process names to the known-game list
    pub fn with_extra_games<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = normalize_process_name(name.as_ref());
            if !name.is_empty() && !self.known_games.contains(&name) {
                self.known_games.push(name);
            }
        }
        self
    }

    pub fn mode(&self) -> GameDisplayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GameDisplayMode) {
        self.mode = mode;
    }

    /// Result of the most recent auto-detect evaluation
    pub fn is_game_detected(&self) -> bool {
        self.last_detected
    }

    /// Score of the most recent auto-detect evaluation
    pub fn last_score(&self) -> f32 {
        self.last_score
    }

    /// Ticks of GPU history required for the sustained signal
    pub fn sustained_window(&self) -> usize {
        self.gpu_history.capacity()
    }

    /// Record one GPU usage sample
    pub fn record_gpu_usage(&mut self, usage: f32) {
        self.gpu_history.push(usage);
    }

    /// Buffer is full and every sample meets the threshold
    pub fn is_gpu_sustained(&self) -> bool {
        self.gpu_history.is_full() && self.gpu_history.values().all(|&u| u >= self.gpu_threshold)
    }

    /// Process name matches the known-game list exactly or by substring
    ///
    /// Short entries such as "wow" or "cs2" must match exactly.
    pub fn is_known_game(&self, process_name: &str) -> bool {
        let name = normalize_process_name(process_name);
        if name.is_empty() {
            return false;
        }
        self.known_games.iter().any(|game| {
            name == *game
                || (game.chars().count() >= MIN_SUBSTRING_MATCH_LEN && name.contains(game.as_str()))
        })
    }

    /// Evaluate one tick: record `gpu_usage` and decide whether to show `fps`
    pub fn should_show_fps(&mut self, fps: Option<f32>, gpu_usage: f32) -> bool {
        self.record_gpu_usage(gpu_usage);

        match self.mode {
            GameDisplayMode::AlwaysShow => has_fps(fps),
            GameDisplayMode::AlwaysHide => false,
            GameDisplayMode::AutoDetect => {
                let detected = self.detect(fps);
                detected && has_fps(fps)
            }
        }
    }

    /// Run auto-detection against the current history and foreground window
    pub fn detect(&mut self, fps: Option<f32>) -> bool {
        if has_fps(fps) {
            self.last_score = 1.0;
            self.last_detected = true;
            return true;
        }

        let signals = self.signals();
        self.last_score = activity_score(&signals);
        self.last_detected = self.last_score >= DETECTION_THRESHOLD;
        self.last_detected
    }

    fn signals(&self) -> ActivitySignals {
        let foreground = self.probe.as_ref().and_then(|probe| probe.foreground());
        let (fullscreen, known_game) = match foreground {
            Some(window) => (
                window.is_fullscreen,
                window
                    .process_name
                    .as_deref()
                    .map(|name| self.is_known_game(name))
                    .unwrap_or(false),
            ),
            None => (false, false),
        };

        ActivitySignals {
            fullscreen,
            sustained_gpu: self.is_gpu_sustained(),
            known_game,
        }
    }
}

fn normalize_process_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeForeground;

    fn detector(mode: GameDisplayMode, window: Option<ForegroundWindow>) -> GameActivityDetector {
        let probe: Box<dyn ForegroundProbe> = Box::new(FakeForeground::new(window));
        GameActivityDetector::new(mode, 1000, 5000, 70.0, Some(probe))
    }

    fn fullscreen_game() -> ForegroundWindow {
        ForegroundWindow {
            process_name: Some("cs2.exe".to_string()),
            is_fullscreen: true,
        }
    }

    #[test]
    fn test_always_show_follows_fps_only() {
        let mut d = detector(GameDisplayMode::AlwaysShow, Some(fullscreen_game()));
        assert!(!d.should_show_fps(Some(0.0), 100.0));
        assert!(!d.should_show_fps(None, 100.0));
        assert!(d.should_show_fps(Some(144.0), 0.0));

        let mut d = detector(GameDisplayMode::AlwaysShow, None);
        assert!(d.should_show_fps(Some(144.0), 0.0));
    }

    #[test]
    fn test_always_hide() {
        let mut d = detector(GameDisplayMode::AlwaysHide, Some(fullscreen_game()));
        assert!(!d.should_show_fps(Some(144.0), 100.0));
    }

    #[test]
    fn test_fps_short_circuits_detection() {
        let mut d = detector(GameDisplayMode::AutoDetect, None);
        assert!(d.should_show_fps(Some(60.0), 0.0));
        assert!(d.is_game_detected());
    }

    #[test]
    fn test_detection_without_fps_does_not_show() {
        let mut d = detector(GameDisplayMode::AutoDetect, Some(fullscreen_game()));
        assert!(!d.should_show_fps(None, 10.0));
        assert!(d.is_game_detected());
        assert!((d.last_score() - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_sustained_gpu_needs_full_window() {
        let mut d = detector(GameDisplayMode::AutoDetect, None);
        assert_eq!(d.sustained_window(), 5);

        for _ in 0..4 {
            d.record_gpu_usage(100.0);
        }
        d.detect(None);
        assert_eq!(d.last_score(), 0.0);
        assert!(!d.is_gpu_sustained());

        d.record_gpu_usage(100.0);
        d.detect(None);
        assert!((d.last_score() - SUSTAINED_GPU_WEIGHT).abs() < 1e-6);
        // 0.3 alone stays below the threshold
        assert!(!d.is_game_detected());
    }

    #[test]
    fn test_one_low_sample_breaks_sustained() {
        let mut d = detector(GameDisplayMode::AutoDetect, None);
        for usage in [90.0, 95.0, 69.9, 99.0, 100.0] {
            d.record_gpu_usage(usage);
        }
        assert!(!d.is_gpu_sustained());

        for _ in 0..5 {
            d.record_gpu_usage(70.0);
        }
        assert!(d.is_gpu_sustained());
    }

    #[test]
    fn test_windowed_known_game_detects() {
        let window = ForegroundWindow {
            process_name: Some("Cyberpunk2077.exe".to_string()),
            is_fullscreen: false,
        };
        let mut d = detector(GameDisplayMode::AutoDetect, Some(window));
        assert!(d.detect(None));
        assert!((d.last_score() - KNOWN_GAME_WEIGHT).abs() < 1e-6);
    }

    #[test]
    fn test_fullscreen_alone_detects() {
        let window = ForegroundWindow {
            process_name: Some("explorer.exe".to_string()),
            is_fullscreen: true,
        };
        let mut d = detector(GameDisplayMode::AutoDetect, Some(window));
        assert!(d.detect(None));
    }

    #[test]
    fn test_known_game_matching() {
        let d = detector(GameDisplayMode::AutoDetect, None).with_extra_games(["MyIndieGame.exe"]);
        assert!(d.is_known_game("CS2.EXE"));
        assert!(d.is_known_game("FortniteClient-Win64-Shipping.exe"));
        assert!(d.is_known_game("myindiegame"));
        assert!(!d.is_known_game("notepad.exe"));
        assert!(!d.is_known_game(""));
    }

    #[test]
    fn test_short_game_names_match_exactly() {
        let d = detector(GameDisplayMode::AutoDetect, None);
        assert!(d.is_known_game("Wow.exe"));
        assert!(d.is_known_game("fifa"));
        assert!(!d.is_known_game("wowexec.exe"));
        assert!(!d.is_known_game("cs2server_helper.exe"));
        assert!(!d.is_known_game("fifaupdater.exe"));
        // Long entries still match inside a longer name
        assert!(d.is_known_game("Cyberpunk2077_launcher.exe"));
    }

    #[test]
    fn test_sample_count_rounds_up() {
        assert_eq!(sustained_sample_count(5000, 1000), 5);
        assert_eq!(sustained_sample_count(5000, 300), 17);
        assert_eq!(sustained_sample_count(5000, 0), 5000);
        assert_eq!(sustained_sample_count(0, 1000), 1);
    }

    #[test]
    fn test_activity_score_weights() {
        let all = ActivitySignals {
            fullscreen: true,
            sustained_gpu: true,
            known_game: true,
        };
        assert!((activity_score(&all) - 1.4).abs() < 1e-6);
        assert_eq!(activity_score(&ActivitySignals::default()), 0.0);
    }
}
