use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::fits_writer::MapDtype;

static SETTINGS: OnceLock<Settings> = OnceLock::new();

const CONFIG_DIRNAME: &str = "skypix";
const CONFIG_FILENAME: &str = "settings.json";
const ENV_PREFIX: &str = "SKYPIX";
const ENV_CONFIG_PATH: &str = "SKYPIX_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sht_iterations: usize,
    pub plot_width: u32,
    pub plot_upgrade: u32,
    pub plot_ticks_deg: f64,
    pub default_dtype: MapDtype,
    pub open_viewer: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sht_iterations: 3,
            plot_width: 800,
            plot_upgrade: 1,
            plot_ticks_deg: 10.0,
            default_dtype: MapDtype::F64,
            open_viewer: true,
        }
    }
}

/// `$SKYPIX_CONFIG`, else `<config dir>/skypix/settings.json`.
pub fn settings_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir().map(|d| d.join(CONFIG_DIRNAME).join(CONFIG_FILENAME))
}

/// Defaults, then the JSON file at `path` (or [`settings_path`]) if it
/// exists, then `SKYPIX_*` environment variables.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let file = path.map(Path::to_path_buf).or_else(settings_path);

    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&Settings::default())?);
    if let Some(file) = &file {
        builder = builder.add_source(
            config::File::from(file.as_path())
                .format(config::FileFormat::Json)
                .required(false),
        );
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

    let settings: Settings = builder
        .build()
        .context("Failed to assemble settings")?
        .try_deserialize()
        .context("Failed to parse settings")?;
    log::debug!("Loaded settings {:?} (file {:?})", settings, file);
    Ok(settings)
}

/// Fixes the process-wide snapshot. Later calls keep the first snapshot.
pub fn init_settings(path: Option<&Path>) -> Result<&'static Settings> {
    let loaded = load_settings(path)?;
    if SETTINGS.set(loaded).is_err() {
        log::warn!("Settings already initialised; keeping the existing snapshot");
    }
    Ok(settings())
}

/// The process-wide snapshot, loaded on first use.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        load_settings(None).unwrap_or_else(|e| {
            log::warn!("Falling back to default settings: {:#}", e);
            Settings::default()
        })
    })
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir: {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write settings to {:?}", path))?;
    log::info!("Saved settings to {}", path.display());
    Ok(())
}
