//! FOTA round-trip automation
//!
//! This crate drives firmware-over-the-air update tests end to end:
//! - Launches a device's server and client emulators as subprocesses
//! - Drives the vendor web portal through Playwright (declarative YAML flows)
//! - Polls the emulator's result file under a tick budget
//! - Appends one outcome line per round to a per-group log
//! - Tears the emulators down on every path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SuiteRunner (devices × times)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestrator::run_round                                    │
//! │    ├── ResultFile::clear_stale()                            │
//! │    ├── EmulatorPair::launch(server, client) -> handles      │
//! │    ├── PortalDriver                                         │
//! │    │     ├── login, search_device                           │
//! │    │     ├── version_exists ? : upload_version              │
//! │    │     └── assign_device_to_group, publish_version        │
//! │    ├── ResultPoller::wait() -> Found | TimedOut             │
//! │    ├── OutcomeRecorder::record("{i}, {t}, {status}")        │
//! │    └── EmulatorPair::teardown() (also on drop)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod device;
pub mod emulator;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod playwright;
pub mod poller;
pub mod portal;
pub mod provision;
pub mod recorder;
pub mod runner;
pub mod status;

pub use config::FotaConfig;
pub use device::Device;
pub use error::{E2eError, E2eResult};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RoundParams, RoundReport};
pub use portal::{Credentials, PlaywrightPortal, PortalDriver, VersionUpload};
pub use runner::{SuitePlan, SuiteResult, SuiteRunner};
pub use status::RunStatus;
