use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use capture_core::CaptureConfig;
use serde::Deserialize;
use url::Url;

use crate::events::TimerKind;

pub const DEFAULT_SETTINGS_FILE: &str = "swapface.toml";
pub const DEFAULT_API_URL: &str = "http://localhost:34568/swapFace";
pub const DEFAULT_CLASSIFIER_URL: &str =
    "http://localhost:34568/resources/haarcascades/haarcascade_frontalface_default.xml";
pub const DEFAULT_DETECTION_ERROR_MESSAGE: &str = "face not detected in submitted photo";

/// Tunables of the workflow machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub max_transport_errors: u32,
    pub max_detection_errors: u32,
    pub detection_delay: Duration,
    pub detection_result_display: Duration,
    pub error_display: Duration,
    pub detection_error_message: String,
    pub require_single_face: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_transport_errors: 2,
            max_detection_errors: 2,
            detection_delay: Duration::from_secs(2),
            detection_result_display: Duration::from_secs(3),
            error_display: Duration::from_secs(4),
            detection_error_message: DEFAULT_DETECTION_ERROR_MESSAGE.into(),
            require_single_face: true,
        }
    }
}

impl WorkflowConfig {
    pub fn delay_for(&self, timer: TimerKind) -> Duration {
        match timer {
            TimerKind::DetectionDelay => self.detection_delay,
            TimerKind::DetectionResult => self.detection_result_display,
            TimerKind::ErrorDisplay => self.error_display,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub classifier_url: String,
    pub fps: u32,
    pub max_transport_errors: u32,
    pub max_detection_errors: u32,
    pub detection_delay_ms: u64,
    pub detection_result_display_ms: u64,
    pub error_display_ms: u64,
    pub detection_error_message: String,
    pub require_single_face: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let workflow = WorkflowConfig::default();
        Self {
            api_url: DEFAULT_API_URL.into(),
            classifier_url: DEFAULT_CLASSIFIER_URL.into(),
            fps: CaptureConfig::default().fps,
            max_transport_errors: workflow.max_transport_errors,
            max_detection_errors: workflow.max_detection_errors,
            detection_delay_ms: workflow.detection_delay.as_millis() as u64,
            detection_result_display_ms: workflow.detection_result_display.as_millis() as u64,
            error_display_ms: workflow.error_display.as_millis() as u64,
            detection_error_message: workflow.detection_error_message,
            require_single_face: workflow.require_single_face,
        }
    }
}

/// Keys accepted in `swapface.toml`; anything omitted keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_url: Option<String>,
    classifier_url: Option<String>,
    fps: Option<u32>,
    max_transport_errors: Option<u32>,
    max_detection_errors: Option<u32>,
    detection_delay_ms: Option<u64>,
    detection_result_display_ms: Option<u64>,
    error_display_ms: Option<u64>,
    detection_error_message: Option<String>,
    require_single_face: Option<bool>,
}

impl Settings {
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            max_transport_errors: self.max_transport_errors,
            max_detection_errors: self.max_detection_errors,
            detection_delay: Duration::from_millis(self.detection_delay_ms),
            detection_result_display: Duration::from_millis(self.detection_result_display_ms),
            error_display: Duration::from_millis(self.error_display_ms),
            detection_error_message: self.detection_error_message.clone(),
            require_single_face: self.require_single_face,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig { fps: self.fps }
    }

    pub fn api_url(&self) -> anyhow::Result<Url> {
        Url::parse(self.api_url.trim())
            .with_context(|| format!("invalid api url: {}", self.api_url))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.api_url()?;
        Url::parse(self.classifier_url.trim())
            .with_context(|| format!("invalid classifier url: {}", self.classifier_url))?;
        if self.fps == 0 {
            bail!("fps must be greater than zero");
        }
        Ok(())
    }

    fn merge_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file_cfg.api_url {
            self.api_url = v;
        }
        if let Some(v) = file_cfg.classifier_url {
            self.classifier_url = v;
        }
        if let Some(v) = file_cfg.fps {
            self.fps = v;
        }
        if let Some(v) = file_cfg.max_transport_errors {
            self.max_transport_errors = v;
        }
        if let Some(v) = file_cfg.max_detection_errors {
            self.max_detection_errors = v;
        }
        if let Some(v) = file_cfg.detection_delay_ms {
            self.detection_delay_ms = v;
        }
        if let Some(v) = file_cfg.detection_result_display_ms {
            self.detection_result_display_ms = v;
        }
        if let Some(v) = file_cfg.error_display_ms {
            self.error_display_ms = v;
        }
        if let Some(v) = file_cfg.detection_error_message {
            self.detection_error_message = v;
        }
        if let Some(v) = file_cfg.require_single_face {
            self.require_single_face = v;
        }
        Ok(())
    }

    /// Applies environment overrides. The `APP__` key wins over the legacy one.
    pub(crate) fn merge_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SWAPFACE_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("APP__API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("APP__CLASSIFIER_URL") {
            self.classifier_url = v;
        }
        if let Some(v) = lookup("APP__FPS") {
            self.fps = parse_env("APP__FPS", &v)?;
        }
        if let Some(v) = lookup("APP__MAX_TRANSPORT_ERRORS") {
            self.max_transport_errors = parse_env("APP__MAX_TRANSPORT_ERRORS", &v)?;
        }
        if let Some(v) = lookup("APP__MAX_DETECTION_ERRORS") {
            self.max_detection_errors = parse_env("APP__MAX_DETECTION_ERRORS", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value: {raw}"))
}

/// Defaults, then `swapface.toml` (or `path`) when present, then environment.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub(crate) fn load_settings_with<F>(path: Option<&Path>, lookup: F) -> anyhow::Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let mut settings = Settings::default();

    match fs::read_to_string(&path) {
        Ok(raw) => settings
            .merge_file(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    settings.merge_env(lookup)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
