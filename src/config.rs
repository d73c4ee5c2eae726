use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "formfill.toml";
pub const CONFIG_ENV_VAR: &str = "FORMFILL_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub detect: DetectSection,
    #[serde(default)]
    pub resolve: ResolveSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct DetectSection {
    /// Characters of document text shown before and after each occurrence in
    /// the classifier view.
    #[serde(default)]
    pub context_window: Option<usize>,
    /// Set to false to report only delimited placeholders.
    #[serde(default)]
    pub blank_fields: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ResolveSection {
    /// Containers scanned backwards when a fill key names a section anchor.
    #[serde(default)]
    pub anchor_lookback: Option<usize>,
    /// "all" or "first".
    #[serde(default)]
    pub raw_keys: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct OutputSection {
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 8) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let cfg = parse_config("").expect("empty config");
        assert!(cfg.detect.context_window.is_none());
        assert!(cfg.resolve.raw_keys.is_none());
        assert!(cfg.output.trace.is_none());
    }

    #[test]
    fn reads_every_section() {
        let cfg = parse_config(
            r#"
[detect]
context_window = 60
blank_fields = false

[resolve]
anchor_lookback = 5
raw_keys = "first"

[output]
suffix = "_done"
trace = true
log_max_chars = 12
"#,
        )
        .expect("config");
        assert_eq!(cfg.detect.context_window, Some(60));
        assert_eq!(cfg.detect.blank_fields, Some(false));
        assert_eq!(cfg.resolve.anchor_lookback, Some(5));
        assert_eq!(cfg.resolve.raw_keys.as_deref(), Some("first"));
        assert_eq!(cfg.output.suffix.as_deref(), Some("_done"));
        assert_eq!(cfg.output.trace, Some(true));
        assert_eq!(cfg.output.log_max_chars, Some(12));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = parse_config("[detect\ncontext_window = 1").unwrap_err();
        assert!(err.to_string().contains("parse config toml"));
    }

    #[test]
    fn upward_search_stops_at_level_limit() {
        let root = std::env::temp_dir().join(format!("formfill-cfg-{}", std::process::id()));
        let deep = root.join("a").join("b").join("c");
        std::fs::create_dir_all(&deep).expect("mkdir");
        std::fs::write(root.join(CONFIG_FILENAME), "").expect("write");

        assert_eq!(
            find_file_upwards(&deep, CONFIG_FILENAME, 3),
            Some(root.join(CONFIG_FILENAME))
        );
        assert_eq!(find_file_upwards(&deep, CONFIG_FILENAME, 2), None);
        let _ = std::fs::remove_dir_all(&root);
    }
}
