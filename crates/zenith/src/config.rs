use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use generator::{DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::cli::parse_size;

const BUILTIN_PRESETS: &[(&str, &str)] = &[
    (
        "plasma",
        "Smoothly shifting plasma of magenta, cyan and gold that swirls over time",
    ),
    (
        "ocean",
        "Rolling ocean waves seen from above with foam highlights and a deep blue palette",
    ),
    (
        "tunnel",
        "Endless neon tunnel rushing toward the viewer with pulsing rings",
    ),
    (
        "aurora",
        "Northern lights rippling across a dark starry sky",
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Contents of `zenith.toml`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api_base: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    pub window_size: String,
    pub auto_fix: bool,
    pub presets: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            window_size: "960x540".to_string(),
            auto_fix: false,
            presets: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base must not be empty".into()));
        }
        self.window_dimensions()?;
        if let Some((name, _)) = self
            .presets
            .iter()
            .find(|(name, prompt)| name.trim().is_empty() || prompt.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "preset '{name}' needs both a name and a prompt"
            )));
        }
        Ok(())
    }

    pub fn window_dimensions(&self) -> Result<(u32, u32), ConfigError> {
        parse_size(&self.window_size)
            .map_err(|err| ConfigError::Invalid(format!("window_size: {err}")))
    }

    /// Built-in example prompts merged with the ones from the file; the file
    /// wins on name clashes.
    pub fn presets(&self) -> BTreeMap<String, String> {
        let mut presets: BTreeMap<String, String> = BUILTIN_PRESETS
            .iter()
            .map(|(name, prompt)| (name.to_string(), prompt.to_string()))
            .collect();
        presets.extend(
            self.presets
                .iter()
                .map(|(name, prompt)| (name.clone(), prompt.clone())),
        );
        presets
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn parses_all_fields() {
        let settings = Settings::from_toml_str(
            r#"
api_base = "https://shaders.example.com/api"
request_timeout = "90s"
window_size = "1280x720"
auto_fix = true

[presets]
lava = "Slow molten lava lamp blobs"
"#,
        )
        .unwrap();
        assert_eq!(settings.api_base, "https://shaders.example.com/api");
        assert_eq!(settings.request_timeout, Duration::from_secs(90));
        assert_eq!(settings.window_dimensions().unwrap(), (1280, 720));
        assert!(settings.auto_fix);
        assert_eq!(
            settings.presets().get("lava").map(String::as_str),
            Some("Slow molten lava lamp blobs")
        );
        assert!(settings.presets().contains_key("plasma"));
    }

    #[test]
    fn numeric_timeouts_are_seconds() {
        let settings = Settings::from_toml_str("request_timeout = 45").unwrap();
        assert_eq!(settings.request_timeout, Duration::from_secs(45));
        assert!(Settings::from_toml_str("request_timeout = -1").is_err());
    }

    #[test]
    fn file_presets_override_builtins() {
        let settings = Settings::from_toml_str("[presets]\nplasma = \"my plasma\"").unwrap();
        assert_eq!(settings.presets()["plasma"], "my plasma");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Settings::from_toml_str("window_size = \"huge\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("api_base = \"  \""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("colour = \"red\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("zenith.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
