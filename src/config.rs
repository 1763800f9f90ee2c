//! Cleaning rules and their TOML configuration.
//!
//! A [`RuleSet`] describes which files get their names scrubbed, which
//! substrings are stripped from those names, which files are swept away
//! entirely, and whether subdirectories are visited.
//!
//! # Configuration File Format
//!
//! ```toml
//! target_extensions = [".mp4", ".mkv"]
//! remove_patterns = ["hhd800.com@", "javdb.com@"]
//! cleanup_extensions = [".url", ".lnk"]
//! recurse_subdirectories = true
//! ```
//!
//! All four keys are required. A file missing any of them is treated as
//! unusable and the built-in defaults are used instead.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".filescrubrc.toml";

/// Errors that can occur while reading or writing a rule set.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax, or a required key is missing.
    ConfigInvalid(String),
    /// IO error while reading or writing configuration.
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::IoError(msg) => write!(f, "IO error in configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Rules driving a single cleaning run.
///
/// Extensions are stored lowercase with a leading dot, so `"MP4"`, `"mp4"`
/// and `".mp4"` all describe the same suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRuleSet")]
pub struct RuleSet {
    target_extensions: Vec<String>,
    remove_patterns: Vec<String>,
    cleanup_extensions: Vec<String>,
    recurse_subdirectories: bool,
}

/// On-disk shape of a rule set before normalization.
#[derive(Deserialize)]
struct RawRuleSet {
    target_extensions: Vec<String>,
    remove_patterns: Vec<String>,
    cleanup_extensions: Vec<String>,
    #[serde(alias = "scan_subdirectories")]
    recurse_subdirectories: bool,
}

impl From<RawRuleSet> for RuleSet {
    fn from(raw: RawRuleSet) -> Self {
        RuleSet::new(
            raw.target_extensions,
            raw.remove_patterns,
            raw.cleanup_extensions,
            raw.recurse_subdirectories,
        )
    }
}

impl RuleSet {
    /// Builds a rule set, normalizing every extension.
    ///
    /// Empty patterns are dropped since they would match every name.
    pub fn new<E, P, C>(
        target_extensions: E,
        remove_patterns: P,
        cleanup_extensions: C,
        recurse_subdirectories: bool,
    ) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        Self {
            target_extensions: normalize_extensions(target_extensions),
            remove_patterns: remove_patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
            cleanup_extensions: normalize_extensions(cleanup_extensions),
            recurse_subdirectories,
        }
    }

    pub fn target_extensions(&self) -> &[String] {
        &self.target_extensions
    }

    pub fn remove_patterns(&self) -> &[String] {
        &self.remove_patterns
    }

    pub fn cleanup_extensions(&self) -> &[String] {
        &self.cleanup_extensions
    }

    pub fn recurse_subdirectories(&self) -> bool {
        self.recurse_subdirectories
    }

    /// Returns true if `file_name` ends with one of the rename target suffixes.
    pub fn is_rename_target(&self, file_name: &str) -> bool {
        has_suffix(file_name, &self.target_extensions)
    }

    /// Returns true if `file_name` ends with one of the cleanup suffixes.
    pub fn is_cleanup_target(&self, file_name: &str) -> bool {
        has_suffix(file_name, &self.cleanup_extensions)
    }

    /// Suffixes that appear in both the rename and the cleanup lists.
    ///
    /// A file matching such a suffix would be renamed and then deleted in the
    /// same pass, so a non-empty result makes the rule set unusable.
    pub fn overlapping_extensions(&self) -> Vec<String> {
        self.target_extensions
            .iter()
            .filter(|ext| self.cleanup_extensions.contains(ext))
            .cloned()
            .collect()
    }

    /// Strips every configured pattern from `file_name`.
    ///
    /// Patterns are applied in order to the evolving name, each removing all
    /// of its occurrences. A removal that leaves two dots side by side, as in
    /// `movie.` + `.mp4`, keeps only one of them. Returns the scrubbed name together with the
    /// patterns that actually matched, or `None` when nothing matched.
    ///
    /// # Examples
    ///
    /// ```
    /// use filescrub::config::RuleSet;
    ///
    /// let rules = RuleSet::new([".mp4"], ["hhd800.com@"], [".url"], true);
    /// let (name, hits) = rules.scrub_name("movie.hhd800.com@.mp4").unwrap();
    /// assert_eq!(name, "movie.mp4");
    /// assert_eq!(hits, vec!["hhd800.com@"]);
    /// assert!(rules.scrub_name("movie.mp4").is_none());
    /// ```
    pub fn scrub_name(&self, file_name: &str) -> Option<(String, Vec<&str>)> {
        let mut candidate = file_name.to_string();
        let mut matched = Vec::new();

        for pattern in &self.remove_patterns {
            if candidate.contains(pattern.as_str()) {
                candidate = strip_pattern(&candidate, pattern);
                matched.push(pattern.as_str());
            }
        }

        if matched.is_empty() || candidate == file_name {
            None
        } else {
            Some((candidate, matched))
        }
    }

    /// Load a rule set, falling back to the defaults on any problem.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.filescrubrc.toml` in the current directory
    /// 3. Look for `~/.config/filescrub/config.toml` in home directory
    /// 4. Fall back to [`RuleSet::default`]
    ///
    /// A file that exists but cannot be parsed, or lacks one of the four keys,
    /// is reported through `tracing` and replaced by the defaults.
    pub fn load(config_path: Option<&Path>) -> Self {
        let candidate = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };

        let Some(path) = candidate else {
            tracing::debug!("no configuration file found, using default rules");
            return Self::default();
        };

        match Self::load_from_file(&path) {
            Ok(rules) => {
                tracing::debug!(path = %path.display(), "loaded rule set");
                let overlap = rules.overlapping_extensions();
                if !overlap.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        ?overlap,
                        "rename and cleanup extensions overlap; cleaning will be refused"
                    );
                }
                rules
            }
            Err(e) => {
                tracing::warn!(error = %e, "falling back to default rules");
                Self::default()
            }
        }
    }

    /// Returns the path of the user-level configuration file, if HOME is set.
    pub fn user_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("filescrub")
                .join("config.toml")
        })
    }

    fn discover() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::user_config_path().filter(|path| path.exists())
    }

    /// Load a rule set from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails or a key is missing.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Writes this rule set to `path` as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(
            [".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".m4v"],
            [
                "hhd800.com@",
                "18av.mm-cg.com@",
                "javdb.com@",
                "javbus.com@",
            ],
            [".url", ".ink", ".lnk", ".desktop"],
            true,
        )
    }
}

fn normalize_extensions<I>(extensions: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for ext in extensions {
        let ext = ext.as_ref().trim().to_lowercase();
        if ext.is_empty() || ext == "." {
            continue;
        }
        let ext = if ext.starts_with('.') {
            ext
        } else {
            format!(".{}", ext)
        };
        if !normalized.contains(&ext) {
            normalized.push(ext);
        }
    }
    normalized
}

/// Removes every occurrence of `pattern`, collapsing a doubled dot at each join.
fn strip_pattern(name: &str, pattern: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(index) = rest.find(pattern) {
        result.push_str(&rest[..index]);
        rest = &rest[index + pattern.len()..];
        if result.ends_with('.') && rest.starts_with('.') {
            rest = &rest[1..];
        }
    }
    result.push_str(rest);
    result
}

fn has_suffix(file_name: &str, extensions: &[String]) -> bool {
    let lower = file_name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}
