use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::page::FitPolicy;

pub const MIN_MAX_WIDTH: u32 = 200;
pub const MAX_MAX_WIDTH: u32 = 9999;
pub const MAX_PAGE_SPACING: u32 = 999;
pub const MIN_ZOOM: f64 = 0.05;
pub const MAX_ZOOM: f64 = 20.0;

/// Pager settings, read from `config.toml`. Missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    pub max_width: u32,
    pub page_spacing: u32,
    pub fit_width: bool,
    pub fit_height: bool,
    pub upscale: bool,
    pub zoom: f64,
    pub page_zoom_step: f64,
    /// 0 picks a size from the rayon thread pool.
    pub worker_threads: usize,
    /// 0 disables the per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            max_width: 1200,
            page_spacing: 20,
            fit_width: true,
            fit_height: false,
            upscale: false,
            zoom: 1.0,
            page_zoom_step: 1.5,
            worker_threads: 0,
            request_timeout_ms: 0,
        }
    }
}

pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    }
}

impl PagerConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: PagerConfig = toml::from_str(s).context("invalid pager config")?;
        Ok(config.validated())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("in {}", path.display()))
    }

    /// Loads `path` if given, else the per-user config file if it exists,
    /// else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validated(mut self) -> Self {
        self.max_width = self.max_width.clamp(MIN_MAX_WIDTH, MAX_MAX_WIDTH);
        self.page_spacing = self.page_spacing.min(MAX_PAGE_SPACING);
        self.zoom = clamp_zoom(self.zoom);
        self.page_zoom_step = clamp_zoom(self.page_zoom_step);
        self
    }

    pub fn fit_policy(&self) -> FitPolicy {
        FitPolicy {
            fit_width: self.fit_width,
            fit_height: self.fit_height,
            upscale: self.upscale,
        }
    }

    pub fn set_fit_policy(&mut self, fit: FitPolicy) {
        self.fit_width = fit.fit_width;
        self.fit_height = fit.fit_height;
        self.upscale = fit.upscale;
    }

    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            rayon::current_num_threads().clamp(1, 8)
        } else {
            self.worker_threads
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

/// `$XDG_CONFIG_HOME/mangascroll/config.toml`, or under `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_home.join("mangascroll").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_keep_defaults() {
        let config = PagerConfig::from_toml("page_spacing = 50\nfit_height = true\n").unwrap();
        assert_eq!(config.page_spacing, 50);
        assert!(config.fit_height);
        assert_eq!(config.max_width, 1200);
        assert!(config.fit_width);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config =
            PagerConfig::from_toml("max_width = 20\npage_spacing = 5000\nzoom = 400.0\n").unwrap();
        assert_eq!(config.max_width, MIN_MAX_WIDTH);
        assert_eq!(config.page_spacing, MAX_PAGE_SPACING);
        assert_eq!(config.zoom, MAX_ZOOM);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(PagerConfig::from_toml("max_width = \"wide\"").is_err());
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "upscale = true\nrequest_timeout_ms = 250\n").unwrap();
        let config = PagerConfig::load_or_default(Some(&path)).unwrap();
        assert!(config.upscale);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert!(PagerConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn worker_threads_default_is_bounded() {
        let threads = PagerConfig::default().worker_threads();
        assert!((1..=8).contains(&threads));
    }
}
