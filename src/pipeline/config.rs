use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV_VAR, CONFIG_FILENAME};
use crate::resolve::{RawKeyScope, DEFAULT_ANCHOR_LOOKBACK};

pub const DEFAULT_CONTEXT_WINDOW: usize = 100;
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_filled";

/// Values a command line can override on top of the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub anchor_lookback: Option<usize>,
    pub raw_keys: Option<String>,
    pub context_window: Option<usize>,
    pub trace: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub context_window: usize,
    pub blank_fields: bool,
    pub anchor_lookback: usize,
    pub raw_keys: RawKeyScope,

    pub output_suffix: String,
    pub trace_dir: PathBuf,
    pub trace: bool,
    pub log_max_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            config_path: PathBuf::from(CONFIG_FILENAME),
            context_window: DEFAULT_CONTEXT_WINDOW,
            blank_fields: true,
            anchor_lookback: DEFAULT_ANCHOR_LOOKBACK,
            raw_keys: RawKeyScope::default(),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            trace_dir: PathBuf::from("_trace"),
            trace: false,
            log_max_chars: 40,
        }
    }
}

impl PipelineConfig {
    /// Resolves the config file (explicit path, then `FORMFILL_CONFIG`, then
    /// an upward search) and layers `overrides` on top.
    pub fn from_paths_and_args(
        input: &Path,
        output: Option<&Path>,
        config_path: Option<PathBuf>,
        overrides: &CliOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));

        Self::from_file_config(&file_cfg, workdir, cfg_path, output, overrides)
    }

    pub fn from_file_config(
        file_cfg: &AppConfig,
        workdir: PathBuf,
        config_path: PathBuf,
        output: Option<&Path>,
        overrides: &CliOverrides,
    ) -> anyhow::Result<Self> {
        let context_window = overrides
            .context_window
            .or(file_cfg.detect.context_window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
        let blank_fields = file_cfg.detect.blank_fields.unwrap_or(true);
        let anchor_lookback = overrides
            .anchor_lookback
            .or(file_cfg.resolve.anchor_lookback)
            .unwrap_or(DEFAULT_ANCHOR_LOOKBACK);
        let raw_keys = match overrides
            .raw_keys
            .as_deref()
            .or(file_cfg.resolve.raw_keys.as_deref())
        {
            Some(s) => RawKeyScope::parse(s)
                .ok_or_else(|| anyhow!("raw_keys must be \"all\" or \"first\", got {s:?}"))?,
            None => RawKeyScope::default(),
        };

        let output_suffix = file_cfg
            .output
            .suffix
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_SUFFIX.to_string());
        let output_dir = output
            .and_then(|o| o.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| workdir.clone());
        let trace_dir = file_cfg
            .output
            .trace_dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            output_dir.join(trace_dir)
        };
        let trace = overrides.trace.or(file_cfg.output.trace).unwrap_or(false);
        let log_max_chars = file_cfg.output.log_max_chars.unwrap_or(40);

        Ok(Self {
            workdir,
            config_path,
            context_window,
            blank_fields,
            anchor_lookback,
            raw_keys,
            output_suffix,
            trace_dir,
            trace,
            log_max_chars,
        })
    }

    /// `<stem><suffix>.docx` next to the input.
    pub fn default_output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let name = format!("{stem}{}.docx", self.output_suffix);
        match input.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[detect]
# Characters of surrounding text exported with each occurrence (--detect-json).
context_window = 100
# Report "Label:" lines followed by blanks as fields.
blank_fields = true

[resolve]
# Containers scanned backwards for the keyword of a "text#@keyword" key.
anchor_lookback = 20
# How a bare placeholder key is applied:
#   "first" the first occurrence no qualified key claimed
#   "all"   every such occurrence
raw_keys = "first"

[output]
# Default output: <input stem><suffix>.docx
suffix = "_filled"
# Relative to the output directory.
trace_dir = "_trace"
trace = false
log_max_chars = 40
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn defaults_without_config_file() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.context_window, 100);
        assert_eq!(cfg.anchor_lookback, 20);
        assert_eq!(cfg.raw_keys, RawKeyScope::FirstUnresolved);
        assert!(cfg.blank_fields);
        assert!(!cfg.trace);
        assert_eq!(cfg.output_suffix, "_filled");
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let file = parse_config("[resolve]\nanchor_lookback = 3\nraw_keys = \"all\"\n")
            .expect("config");
        let overrides = CliOverrides {
            anchor_lookback: Some(7),
            ..CliOverrides::default()
        };
        let cfg = PipelineConfig::from_file_config(
            &file,
            PathBuf::from("/work"),
            PathBuf::from("/work/formfill.toml"),
            Some(Path::new("/out/x.docx")),
            &overrides,
        )
        .expect("pipeline config");
        assert_eq!(cfg.anchor_lookback, 7);
        assert_eq!(cfg.raw_keys, RawKeyScope::AllUnresolved);
        assert_eq!(cfg.trace_dir, PathBuf::from("/out/_trace"));
    }

    #[test]
    fn bad_raw_keys_value_is_rejected() {
        let file = parse_config("[resolve]\nraw_keys = \"some\"\n").expect("config");
        let err = PipelineConfig::from_file_config(
            &file,
            PathBuf::from("."),
            PathBuf::from(CONFIG_FILENAME),
            None,
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("raw_keys"));
    }

    #[test]
    fn output_path_uses_suffix() {
        let cfg = PipelineConfig::default();
        assert_eq!(
            cfg.default_output_path(Path::new("forms/nda.docx")),
            PathBuf::from("forms/nda_filled.docx")
        );
        assert_eq!(
            cfg.default_output_path(Path::new("nda.docx")),
            PathBuf::from("nda_filled.docx")
        );
    }

    #[test]
    fn written_default_config_parses() {
        let dir = std::env::temp_dir().join(format!("formfill-init-{}", std::process::id()));
        let path = init_default_config(&dir, true).expect("init config");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.detect.context_window, Some(100));
        assert_eq!(cfg.resolve.raw_keys.as_deref(), Some("first"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
