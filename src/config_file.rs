use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration file handler for loghit
///
/// The only setting is `defaults`, a shell-quoted argument string placed in
/// front of the command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub defaults: Option<String>,
}

impl ConfigFile {
    /// Find project-level .loghitrc by walking up directory tree
    pub fn find_project_config() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let config_path = current.join(".loghitrc");
            if config_path.exists() {
                return Some(config_path);
            }
            if !current.pop() {
                // Reached filesystem root
                break;
            }
        }
        None
    }

    /// Get list of user config file locations in order of preference
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            // 1. %APPDATA%\loghit\config.ini
            // 2. %USERPROFILE%\.loghitrc
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("loghit").join("config.ini"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(userprofile).join(".loghitrc"));
            }
        } else {
            // 1. $XDG_CONFIG_HOME/loghit/config.ini
            // 2. ~/.config/loghit/config.ini (XDG fallback)
            // 3. ~/.loghitrc
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });

            paths.push(xdg_config.join("loghit").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(".loghitrc"));
            }
        }

        paths
    }

    /// Load configuration with precedence: project > user
    pub fn load() -> Result<Self> {
        if let Some(project_path) = Self::find_project_config() {
            return Self::load_from_path(&project_path);
        }
        for path in Self::get_user_config_paths() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration with optional custom config file path
    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(Self::parse_ini_content(&content))
    }

    /// Parse INI content; `defaults` is read at root level or in a `[defaults]` section
    fn parse_ini_content(content: &str) -> Self {
        let mut defaults = None;
        let mut current_section = String::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let in_defaults = current_section.is_empty() || current_section == "defaults";
                if in_defaults && key.trim() == "defaults" {
                    defaults = Some(value.trim().to_string());
                }
                // Ignore unknown keys and sections
            }
        }

        Self { defaults }
    }

    /// Insert the configured defaults after the program name
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let Some(defaults) = &self.defaults else {
            return Ok(args);
        };
        let default_args = shell_words::split(defaults)
            .with_context(|| "Invalid defaults: failed to parse arguments".to_string())?;

        let mut args = args.into_iter();
        let mut result: Vec<String> = args.next().into_iter().collect();
        result.extend(default_args);
        result.extend(args);
        Ok(result)
    }
}

/// Value of `--config-file` in raw arguments, in either `--config-file X` or `--config-file=X` form
pub fn extract_config_file_arg(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config-file" {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix("--config-file=") {
            return Some(value.to_string());
        }
    }
    None
}
