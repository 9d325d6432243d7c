//! Shell detection and configuration for command execution.

use std::path::PathBuf;

use serde::Deserialize;

/// Shell override from the `[shell]` config section.
///
/// ```toml
/// [shell]
/// binary = "zsh"
/// args = ["-c"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/fish", "cmd").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]` or `["/C"]`).
    pub args: Option<Vec<String>>,
}

/// Shell used to interpret command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments placed before the command string (e.g., `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl DetectedShell {
    /// POSIX `sh -c`, independent of the environment.
    #[must_use]
    pub fn posix_sh() -> Self {
        Self {
            binary: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string()],
            name: "sh".into(),
        }
    }
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Pick the shell: config override first, then platform detection.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }

    detect_platform_shell()
}

/// Infer the command-string flag for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    let name = std::path::Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "cmd" => vec!["/C".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        _ => vec!["-c".to_string()],
    }
}

#[cfg(windows)]
fn detect_platform_shell() -> DetectedShell {
    let comspec = std::env::var("ComSpec")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(r"C:\Windows\System32\cmd.exe"));
    DetectedShell {
        binary: comspec,
        args: default_args_for("cmd"),
        name: "cmd".into(),
    }
}

#[cfg(not(windows))]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(shell) = std::env::var("SHELL") {
        let path = std::path::Path::new(&shell);
        if path.is_file() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                args: default_args_for(&shell),
                binary: PathBuf::from(&shell),
                name,
            };
        }
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }
    DetectedShell::posix_sh()
}

#[cfg(test)]
mod tests {
    use super::{DetectedShell, PathBuf, ShellConfig, default_args_for, detect_shell};

    #[test]
    fn cmd_gets_slash_c() {
        assert_eq!(default_args_for("cmd"), vec!["/C"]);
        assert_eq!(default_args_for("cmd.exe"), vec!["/C"]);
    }

    #[test]
    fn powershell_gets_command_flag() {
        assert_eq!(default_args_for("pwsh"), vec!["-NoProfile", "-Command"]);
        assert_eq!(
            default_args_for("powershell.exe"),
            vec!["-NoProfile", "-Command"]
        );
    }

    #[test]
    fn unix_shells_get_dash_c() {
        assert_eq!(default_args_for("sh"), vec!["-c"]);
        assert_eq!(default_args_for("/bin/bash"), vec!["-c"]);
        assert_eq!(default_args_for("/usr/local/bin/fish"), vec!["-c"]);
    }

    #[test]
    fn config_override_wins() {
        let config = ShellConfig {
            binary: Some("fish".to_string()),
            args: Some(vec!["-c".to_string()]),
        };
        let shell = detect_shell(Some(&config));
        assert_eq!(shell.binary, PathBuf::from("fish"));
        assert_eq!(shell.args, vec!["-c"]);
        assert_eq!(shell.name, "configured");
    }

    #[test]
    fn config_override_infers_args() {
        let config = ShellConfig {
            binary: Some("zsh".to_string()),
            args: None,
        };
        assert_eq!(detect_shell(Some(&config)).args, vec!["-c"]);
    }

    #[test]
    fn config_without_binary_falls_through() {
        let config = ShellConfig::default();
        let shell = detect_shell(Some(&config));
        assert_ne!(shell.name, "configured");
        assert!(!shell.args.is_empty());
    }

    #[test]
    fn posix_sh_is_stable() {
        assert_eq!(DetectedShell::posix_sh().binary, PathBuf::from("/bin/sh"));
    }
}
