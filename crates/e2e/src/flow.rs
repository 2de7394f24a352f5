//! Declarative YAML browser flows with `{{placeholder}}` substitution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{E2eError, E2eResult};

/// Values substituted into a flow before it runs
pub type FlowVars = BTreeMap<String, String>;

/// A browser flow parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    /// Unique name for this flow
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Steps to execute in order
    pub steps: Vec<FlowStep>,
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A single step in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FlowStep {
    /// Navigate to a URL (relative to base)
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Click an element
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        clear_first: bool,
    },

    /// Press a key
    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    /// Wait for an element to reach a state
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time
    Sleep { ms: u64 },

    /// Assert something about an element
    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        attribute: Option<AttributeAssertion>,
        #[serde(default)]
        count: Option<usize>,
    },

    /// Take a screenshot
    Screenshot {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        full_page: bool,
    },

    /// Select an option from a dropdown by label
    Select { selector: String, value: String },

    /// Check a checkbox
    Check { selector: String },

    /// Attach a local file to a file input
    Upload { selector: String, path: String },

    /// Log a message
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeAssertion {
    pub name: String,
    pub value: String,
}

impl FlowStep {
    /// Short label used in logs and failure reports
    pub fn label(&self) -> String {
        match self {
            FlowStep::Navigate { url, .. } => format!("navigate:{}", url),
            FlowStep::Click { selector, .. } => format!("click:{}", selector),
            FlowStep::Fill { selector, .. } => format!("fill:{}", selector),
            FlowStep::Press { key, .. } => format!("press:{}", key),
            FlowStep::Wait { selector, .. } => format!("wait:{}", selector),
            FlowStep::Sleep { ms } => format!("sleep:{}ms", ms),
            FlowStep::Assert { selector, .. } => format!("assert:{}", selector),
            FlowStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            FlowStep::Select { selector, .. } => format!("select:{}", selector),
            FlowStep::Check { selector } => format!("check:{}", selector),
            FlowStep::Upload { selector, .. } => format!("upload:{}", selector),
            FlowStep::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
        }
    }
}

impl FlowSpec {
    /// Parse a flow with no placeholders
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        Self::from_yaml_with(yaml, &FlowVars::new())
    }

    /// Parse a flow, substituting `{{name}}` in every string value.
    ///
    /// Substitution happens on the parsed document, so values containing
    /// quotes or YAML syntax cannot change the flow's structure.
    pub fn from_yaml_with(yaml: &str, vars: &FlowVars) -> E2eResult<Self> {
        let mut doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        substitute(&mut doc, vars)?;
        Ok(serde_yaml::from_value(doc)?)
    }

    /// Parse a flow from a YAML file
    pub fn from_file(path: &Path, vars: &FlowVars) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_with(&content, vars)
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex"))
}

/// Replace every `{{name}}` in `text`; an unbound name is an error
pub fn render(text: &str, vars: &FlowVars) -> E2eResult<String> {
    let mut missing = None;
    let rendered = placeholder().replace_all(text, |caps: &regex::Captures| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(E2eError::FlowParse(format!("unbound placeholder {{{{{}}}}}", key))),
        None => Ok(rendered.into_owned()),
    }
}

fn substitute(value: &mut serde_yaml::Value, vars: &FlowVars) -> E2eResult<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = render(s, vars)?;
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                substitute(item, vars)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, vars)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The portal operations backed by a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Login,
    SearchDevice,
    VersionExists,
    UploadVersion,
    AssignDevice,
    PublishVersion,
}

impl FlowKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            FlowKind::Login => "login.yaml",
            FlowKind::SearchDevice => "search_device.yaml",
            FlowKind::VersionExists => "version_exists.yaml",
            FlowKind::UploadVersion => "upload_version.yaml",
            FlowKind::AssignDevice => "assign_device.yaml",
            FlowKind::PublishVersion => "publish_version.yaml",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            FlowKind::Login => include_str!("../flows/login.yaml"),
            FlowKind::SearchDevice => include_str!("../flows/search_device.yaml"),
            FlowKind::VersionExists => include_str!("../flows/version_exists.yaml"),
            FlowKind::UploadVersion => include_str!("../flows/upload_version.yaml"),
            FlowKind::AssignDevice => include_str!("../flows/assign_device.yaml"),
            FlowKind::PublishVersion => include_str!("../flows/publish_version.yaml"),
        }
    }
}

/// Built-in flows, optionally overridden file-by-file from a directory
#[derive(Debug, Clone, Default)]
pub struct FlowLibrary {
    dir: Option<PathBuf>,
}

impl FlowLibrary {
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    pub fn load(&self, kind: FlowKind, vars: &FlowVars) -> E2eResult<FlowSpec> {
        if let Some(dir) = &self.dir {
            let path = dir.join(kind.file_name());
            if path.exists() {
                return FlowSpec::from_file(&path, vars);
            }
        }
        FlowSpec::from_yaml_with(kind.builtin(), vars)
    }
}
