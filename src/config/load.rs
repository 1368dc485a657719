use super::error::field_error;
use super::{ConfigError, Settings, DEFAULT_SETTINGS_FILE_NAME};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub goal: Option<String>,
    pub cycles: Option<u32>,
    pub model: Option<String>,
}

pub fn load_settings(
    config_path: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<Settings, ConfigError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE_NAME));
    let mut settings = if path.is_file() || config_path.is_some() {
        Settings::from_path(&path)?
    } else {
        Settings::default()
    };

    if let Some(goal) = overrides.goal.as_deref() {
        settings.goal = goal.to_string();
    }
    if let Some(cycles) = overrides.cycles {
        if cycles < 1 {
            return Err(field_error("cycles", "must be at least 1"));
        }
        settings.cycles = cycles;
    }
    if let Some(model) = overrides.model.as_deref() {
        settings.default_model = model.to_string();
    }

    settings.validate()?;
    Ok(settings)
}
