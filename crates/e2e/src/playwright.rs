//! Playwright browser automation
//!
//! A flow is compiled into a single Node.js script and executed in one
//! browser context. Sign-in state carries between runs only through
//! [`SessionFiles`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::flow::{FlowSpec, FlowStep};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    /// Parse a browser name; anything unknown falls back to Chromium
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "firefox" => Browser::Firefox,
            "webkit" | "safari" => Browser::Webkit,
            _ => Browser::Chromium,
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Portal base URL
    pub base_url: String,
    /// Where screenshots (including failure captures) are written
    pub screenshot_dir: PathBuf,
    pub browser: Browser,
    pub headless: bool,
    /// Default timeout for every Playwright action
    pub default_timeout_ms: u64,
    /// `node_modules` directory that provides `playwright` and `@playwright/test`
    pub node_modules: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            screenshot_dir: PathBuf::from("results/screenshots"),
            browser: Browser::Chromium,
            headless: true,
            default_timeout_ms: 10_000,
            node_modules: None,
        }
    }
}

/// Result of running one flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Label of the step that failed
    pub failed_step: Option<String>,
    /// Position of the failed step within the flow
    pub failed_index: Option<usize>,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// Failure report printed by the generated script
#[derive(Debug, Deserialize)]
struct ScriptFailure {
    #[serde(default)]
    step: String,
    #[serde(default = "no_step")]
    index: i64,
    #[serde(default)]
    error: String,
}

fn no_step() -> i64 {
    -1
}

/// Browser storage state (cookies, local storage) shared between runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFiles {
    /// Start the context from this state
    pub load: Option<PathBuf>,
    /// Write the context's state here once every step has passed
    pub save: Option<PathBuf>,
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;
        std::fs::create_dir_all(&config.screenshot_dir)?;
        Ok(Self { config })
    }

    /// Create a handle without probing for the Playwright install
    pub fn unchecked(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Run a flow and report its outcome. Script failures are reported in
    /// the returned `FlowRun`; only infrastructure errors are `Err`.
    pub async fn run_flow(&self, flow: &FlowSpec) -> E2eResult<FlowRun> {
        self.run_flow_with(flow, &SessionFiles::default()).await
    }

    /// Run a flow, loading and/or saving the browser session
    pub async fn run_flow_with(&self, flow: &FlowSpec, session: &SessionFiles) -> E2eResult<FlowRun> {
        let start = Instant::now();
        debug!("Running flow: {} ({} steps)", flow.name, flow.steps.len());

        let script = self.build_script_with(flow, session);
        let outcome = self.run_script(&script).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(match outcome {
            None => FlowRun {
                name: flow.name.clone(),
                success: true,
                duration_ms,
                failed_step: None,
                failed_index: None,
                error: None,
                screenshot_path: None,
            },
            Some(failure) => FlowRun {
                name: flow.name.clone(),
                success: false,
                duration_ms,
                failed_index: usize::try_from(failure.index).ok(),
                failed_step: Some(failure.step),
                error: Some(failure.error),
                screenshot_path: Some(self.failure_screenshot(&flow.name)),
            },
        })
    }

    fn failure_screenshot(&self, flow_name: &str) -> PathBuf {
        self.config.screenshot_dir.join(format!("{}-failure.png", flow_name))
    }

    /// Build the Playwright script for a flow
    pub fn build_script(&self, flow: &FlowSpec) -> String {
        self.build_script_with(flow, &SessionFiles::default())
    }

    pub fn build_script_with(&self, flow: &FlowSpec, session: &SessionFiles) -> String {
        let storage = session
            .load
            .as_ref()
            .map(|path| format!("\n    storageState: {},", js(&path.to_string_lossy())))
            .unwrap_or_default();

        let mut script = format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect }} = require('@playwright/test');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{{storage}
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({timeout});
  const baseUrl = {base_url};
  let step = '';
  let index = -1;

  try {{
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = flow.viewport.width,
            height = flow.viewport.height,
            timeout = self.config.default_timeout_ms,
            base_url = js(&self.config.base_url),
            storage = storage,
        );

        for (i, step) in flow.steps.iter().enumerate() {
            let label = step.label();
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, label));
            script.push_str(&format!("    step = {};\n    index = {};\n", js(&label), i));
            script.push_str(&self.step_to_js(step));
            script.push('\n');
        }

        if let Some(path) = &session.save {
            script.push_str(&format!(
                "\n    await context.storageState({{ path: {} }});\n",
                js(&path.to_string_lossy())
            ));
        }

        script.push_str(&format!(
            r#"
    console.log(JSON.stringify({{ success: true }}));
  }} catch (error) {{
    await page.screenshot({{ path: {failure}, fullPage: true }}).catch(() => {{}});
    console.error(JSON.stringify({{ success: false, step, index, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            failure = js(&self.failure_screenshot(&flow.name).to_string_lossy()),
        ));

        script
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, step: &FlowStep) -> String {
        match step {
            FlowStep::Navigate { url, wait_for_selector } => {
                let mut code = format!("    await page.goto(baseUrl + {});", js(url));
                if let Some(sel) = wait_for_selector {
                    code.push_str(&format!("\n    await page.waitForSelector({});", js(sel)));
                }
                code
            }
            FlowStep::Click { selector, timeout_ms } => match timeout_ms {
                Some(t) => format!("    await page.click({}, {{ timeout: {} }});", js(selector), t),
                None => format!("    await page.click({});", js(selector)),
            },
            FlowStep::Fill { selector, value, clear_first } => {
                let fill = format!("    await page.fill({}, {});", js(selector), js(value));
                if *clear_first {
                    format!("    await page.fill({}, '');\n{}", js(selector), fill)
                } else {
                    fill
                }
            }
            FlowStep::Press { selector, key } => match selector {
                Some(sel) => format!("    await page.locator({}).press({});", js(sel), js(key)),
                None => format!("    await page.keyboard.press({});", js(key)),
            },
            FlowStep::Wait { selector, timeout_ms, state } => format!(
                "    await page.waitForSelector({}, {{ state: '{}', timeout: {} }});",
                js(selector),
                state.as_str(),
                timeout_ms
            ),
            FlowStep::Sleep { ms } => format!("    await page.waitForTimeout({});", ms),
            FlowStep::Assert {
                selector,
                visible,
                enabled,
                text,
                text_contains,
                value,
                attribute,
                count,
            } => {
                let loc = format!("page.locator({})", js(selector));
                let mut assertions = Vec::new();

                if let Some(vis) = visible {
                    let matcher = if *vis { "toBeVisible()" } else { "toBeHidden()" };
                    assertions.push(format!("    await expect({}).{};", loc, matcher));
                }
                if let Some(en) = enabled {
                    let matcher = if *en { "toBeEnabled()" } else { "toBeDisabled()" };
                    assertions.push(format!("    await expect({}).{};", loc, matcher));
                }
                if let Some(t) = text {
                    assertions.push(format!("    await expect({}).toHaveText({});", loc, js(t)));
                }
                if let Some(tc) = text_contains {
                    assertions.push(format!("    await expect({}).toContainText({});", loc, js(tc)));
                }
                if let Some(v) = value {
                    assertions.push(format!("    await expect({}).toHaveValue({});", loc, js(v)));
                }
                if let Some(attr) = attribute {
                    assertions.push(format!(
                        "    await expect({}).toHaveAttribute({}, {});",
                        loc,
                        js(&attr.name),
                        js(&attr.value)
                    ));
                }
                if let Some(c) = count {
                    assertions.push(format!("    await expect({}).toHaveCount({});", loc, c));
                }

                assertions.join("\n")
            }
            FlowStep::Screenshot { name, selector, full_page } => {
                let path = self.config.screenshot_dir.join(format!("{}.png", name));
                let path = js(&path.to_string_lossy());
                match selector {
                    Some(sel) => format!("    await page.locator({}).screenshot({{ path: {} }});", js(sel), path),
                    None => format!("    await page.screenshot({{ path: {}, fullPage: {} }});", path, full_page),
                }
            }
            FlowStep::Select { selector, value } => format!(
                "    await page.selectOption({}, {{ label: {} }});",
                js(selector),
                js(value)
            ),
            FlowStep::Check { selector } => format!("    await page.check({});", js(selector)),
            FlowStep::Upload { selector, path } => {
                format!("    await page.setInputFiles({}, {});", js(selector), js(path))
            }
            FlowStep::Log { message } => format!("    console.log('[FLOW]', {});", js(message)),
        }
    }

    /// Execute a script with node. `Ok(None)` means success.
    async fn run_script(&self, script: &str) -> E2eResult<Option<ScriptFailure>> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("flow.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path).current_dir(temp_dir.path());
        if let Some(modules) = &self.config.node_modules {
            cmd.env("NODE_PATH", modules);
        }

        let output = cmd.output().await.map_err(|e| E2eError::Playwright(format!("cannot run node: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| l.starts_with("[FLOW]")) {
            info!("{}", line);
        }

        if output.status.success() {
            return Ok(None);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let failure = stderr
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<ScriptFailure>(line).ok());

        match failure {
            Some(failure) => Ok(Some(failure)),
            // The script never reached its own error handler
            None => Err(E2eError::Playwright(format!(
                "Script failed:\nstdout: {}\nstderr: {}",
                stdout, stderr
            ))),
        }
    }
}

/// Encode a string as a JavaScript literal
fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PlaywrightHandle {
        PlaywrightHandle::unchecked(PlaywrightConfig {
            base_url: "https://portal.example.com".to_string(),
            screenshot_dir: PathBuf::from("/tmp/shots"),
            ..Default::default()
        })
    }

    #[test]
    fn test_script_quotes_values() {
        let flow = FlowSpec::from_yaml(
            r#"
name: search
steps:
  - action: fill
    selector: '#search'
    value: "O'Brien \"quoted\""
"#,
        )
        .unwrap();

        let script = handle().build_script(&flow);
        assert!(script.contains(r##"await page.fill("#search", "O'Brien \"quoted\"");"##));
        assert!(script.contains(r#"const baseUrl = "https://portal.example.com";"#));
        assert!(script.contains(r#"step = "fill:#search";"#));
        assert!(script.contains("index = 0;"));
        assert!(script.contains("/tmp/shots/search-failure.png"));
        assert!(!script.contains("storageState"));
    }

    #[test]
    fn test_session_state_loaded_and_saved() {
        let flow = FlowSpec::from_yaml(
            r#"
name: login
steps:
  - action: click
    selector: '#submit'
"#,
        )
        .unwrap();
        let session = SessionFiles {
            load: Some(PathBuf::from("/tmp/in.json")),
            save: Some(PathBuf::from("/tmp/out.json")),
        };

        let script = handle().build_script_with(&flow, &session);
        assert!(script.contains(r#"storageState: "/tmp/in.json","#));
        let saved = script.find(r#"await context.storageState({ path: "/tmp/out.json" });"#).unwrap();
        let passed = script.find("success: true").unwrap();
        assert!(saved < passed);
    }

    #[test]
    fn test_failure_report_carries_step_index() {
        let failure: ScriptFailure =
            serde_json::from_str(r#"{"success":false,"step":"click:#submit","index":3,"error":"timeout"}"#).unwrap();
        assert_eq!(failure.index, 3);

        let failure: ScriptFailure = serde_json::from_str(r#"{"success":false,"error":"boom"}"#).unwrap();
        assert_eq!(usize::try_from(failure.index).ok(), None);
    }

    #[test]
    fn test_assert_compiles_every_matcher() {
        let flow = FlowSpec::from_yaml(
            r#"
name: publish
steps:
  - action: assert
    selector: '#group'
    visible: true
    enabled: false
    value: autotests_FAM
"#,
        )
        .unwrap();

        let script = handle().build_script(&flow);
        assert!(script.contains(r##"await expect(page.locator("#group")).toBeVisible();"##));
        assert!(script.contains(r##"await expect(page.locator("#group")).toBeDisabled();"##));
        assert!(script.contains(r##"await expect(page.locator("#group")).toHaveValue("autotests_FAM");"##));
    }

    #[test]
    fn test_upload_and_select() {
        let flow = FlowSpec::from_yaml(
            r#"
name: upload
steps:
  - action: upload
    selector: 'input[type="file"]'
    path: D:/SWFOTA/fw.exe
  - action: select
    selector: '#install'
    value: Force
"#,
        )
        .unwrap();

        let script = handle().build_script(&flow);
        assert!(script.contains(r#"await page.setInputFiles("input[type=\"file\"]", "D:/SWFOTA/fw.exe");"#));
        assert!(script.contains(r##"await page.selectOption("#install", { label: "Force" });"##));
    }

    #[test]
    fn test_browser_names() {
        assert_eq!(Browser::from_name("Firefox"), Browser::Firefox);
        assert_eq!(Browser::from_name("safari"), Browser::Webkit);
        assert_eq!(Browser::from_name("chrome"), Browser::Chromium);
    }
}
