//! Runner configuration

use std::path::PathBuf;

/// Labels a Linux host answers to in `runs-on`
const LINUX_LABELS: &[&str] = &[
    "ubuntu-latest",
    "ubuntu-22.04",
    "ubuntu-20.04",
    "linux",
    "self-hosted",
];
const MACOS_LABELS: &[&str] = &["macos-latest", "macos", "self-hosted"];
const WINDOWS_LABELS: &[&str] = &["windows-latest", "windows", "self-hosted"];

/// Configuration for running steps on this host
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Default shell for `run:` steps (`bash` or `sh`)
    pub shell: String,

    /// Directory steps run in (the checked-out repository)
    pub workspace: PathBuf,

    /// Scratch space for per-cell files
    pub temp_dir: PathBuf,

    /// Default step timeout in seconds
    pub timeout_secs: u64,

    /// `runs-on` labels this host provides
    pub labels: Vec<String>,

    /// Directories searched for interpreters by `actions/setup-python`
    pub python_search_path: Vec<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            temp_dir: std::env::temp_dir().join("greynir-ci"),
            // Hosted runners allow six hours per job
            timeout_secs: 6 * 60 * 60,
            labels: default_labels(),
            python_search_path: path_dirs(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Add one label to the defaults
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_python_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.python_search_path = dirs;
        self
    }

    /// Does this host provide every requested label?
    pub fn supports_labels(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|label| self.labels.iter().any(|l| l.eq_ignore_ascii_case(label)))
    }

    /// `runner.os` as the hosted CI spells it
    pub fn os_name(&self) -> &'static str {
        match std::env::consts::OS {
            "macos" => "macOS",
            "windows" => "Windows",
            _ => "Linux",
        }
    }

    /// `runner.arch` as the hosted CI spells it
    pub fn arch_name(&self) -> &'static str {
        match std::env::consts::ARCH {
            "x86_64" => "X64",
            "aarch64" => "ARM64",
            "arm" => "ARM",
            _ => "X86",
        }
    }
}

fn default_labels() -> Vec<String> {
    let labels = match std::env::consts::OS {
        "macos" => MACOS_LABELS,
        "windows" => WINDOWS_LABELS,
        _ => LINUX_LABELS,
    };
    labels.iter().map(|s| s.to_string()).collect()
}

fn path_dirs() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_builder() {
        let config = RunnerConfig::new()
            .with_shell("sh")
            .with_workspace("/tmp/ws")
            .with_timeout(600)
            .with_labels(vec!["ubuntu-latest".to_string()])
            .with_label("gpu");

        assert_eq!(config.shell, "sh");
        assert_eq!(config.workspace, PathBuf::from("/tmp/ws"));
        assert_eq!(config.timeout_secs, 600);
        assert_eq!(config.labels, vec!["ubuntu-latest", "gpu"]);
    }

    #[test]
    fn test_supports_labels() {
        let config = RunnerConfig::new()
            .with_labels(vec!["ubuntu-latest".to_string(), "self-hosted".to_string()]);
        assert!(config.supports_labels(&["ubuntu-latest".to_string()]));
        assert!(config.supports_labels(&["Ubuntu-Latest".to_string(), "self-hosted".to_string()]));
        assert!(!config.supports_labels(&["windows-latest".to_string()]));
        assert!(config.supports_labels(&[]));
    }
}
