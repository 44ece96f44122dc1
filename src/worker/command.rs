use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment variable that selects the development layout
pub const LAYOUT_ENV: &str = "WAND_BRIDGE_ENV";

/// Entry script location relative to the project root in a development checkout
const DEV_SCRIPT: &str = "src/backend/cli.py";

/// Entry script location relative to the resources directory of a packaged build
const PACKAGED_SCRIPT: &str = "backend/cli.py";

/// Where the worker entry script lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Development,
    Packaged,
}

impl Layout {
    /// Pick the layout from the process environment
    pub fn detect() -> Self {
        Self::from_env_value(std::env::var(LAYOUT_ENV).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("development") => Layout::Development,
            _ => Layout::Packaged,
        }
    }
}

/// How to launch the worker, as read from the `[worker]` config table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

fn default_interpreter() -> String {
    "python".to_string()
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            layout: None,
            project_root: None,
            resources_dir: None,
            script: None,
        }
    }
}

impl WorkerSettings {
    pub fn layout(&self) -> Layout {
        self.layout.unwrap_or_else(Layout::detect)
    }

    /// Resolve the entry script path. This is the only part of launching a
    /// worker that depends on the environment.
    pub fn script_path(&self) -> Result<PathBuf> {
        if let Some(script) = &self.script {
            return Ok(script.clone());
        }

        match self.layout() {
            Layout::Development => {
                let root = match &self.project_root {
                    Some(root) => root.clone(),
                    None => std::env::current_dir().context("Failed to read current directory")?,
                };
                Ok(root.join(DEV_SCRIPT))
            }
            Layout::Packaged => {
                let resources = match &self.resources_dir {
                    Some(dir) => dir.clone(),
                    None => default_resources_dir()?,
                };
                Ok(resources.join(PACKAGED_SCRIPT))
            }
        }
    }

    /// Build the full command line: interpreter, extra args, entry script
    pub fn command(&self) -> Result<WorkerCommand> {
        let script = self.script_path()?;
        Ok(WorkerCommand::new(&self.interpreter)
            .args(&self.args)
            .arg(script))
    }
}

/// Packaged builds ship their resources next to the executable
fn default_resources_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join("resources"))
}

/// A fully resolved worker command line, spawned once per request
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Spawn with all three standard streams piped
    pub fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_from_env_value() {
        assert_eq!(Layout::from_env_value(Some("development")), Layout::Development);
        assert_eq!(Layout::from_env_value(Some("Development")), Layout::Development);
        assert_eq!(Layout::from_env_value(Some("production")), Layout::Packaged);
        assert_eq!(Layout::from_env_value(None), Layout::Packaged);
    }

    #[test]
    fn development_layout_uses_project_root() {
        let settings = WorkerSettings {
            layout: Some(Layout::Development),
            project_root: Some(PathBuf::from("/work/app")),
            ..WorkerSettings::default()
        };
        assert_eq!(
            settings.script_path().unwrap(),
            PathBuf::from("/work/app/src/backend/cli.py")
        );
    }

    #[test]
    fn packaged_layout_uses_resources_dir() {
        let settings = WorkerSettings {
            layout: Some(Layout::Packaged),
            resources_dir: Some(PathBuf::from("/opt/wand/resources")),
            ..WorkerSettings::default()
        };
        assert_eq!(
            settings.script_path().unwrap(),
            PathBuf::from("/opt/wand/resources/backend/cli.py")
        );
    }

    #[test]
    fn explicit_script_wins_over_layout() {
        let settings = WorkerSettings {
            layout: Some(Layout::Development),
            project_root: Some(PathBuf::from("/work/app")),
            script: Some(PathBuf::from("/tmp/fake_worker.py")),
            ..WorkerSettings::default()
        };
        assert_eq!(settings.script_path().unwrap(), PathBuf::from("/tmp/fake_worker.py"));
    }

    #[test]
    fn command_places_args_before_script() {
        let settings = WorkerSettings {
            interpreter: "python3".to_string(),
            args: vec!["-u".to_string()],
            script: Some(PathBuf::from("/srv/cli.py")),
            ..WorkerSettings::default()
        };
        let command = settings.command().unwrap();
        assert_eq!(command.to_string(), "python3 -u /srv/cli.py");
    }

    #[test]
    fn default_interpreter_is_python() {
        assert_eq!(WorkerSettings::default().interpreter, "python");
    }
}
