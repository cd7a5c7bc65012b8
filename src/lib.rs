//! Deputy: a dependency-update pull-request orchestrator.
//!
//! One run walks the configured update blocks in order, launches an
//! ephemeral updater container per job, serves that container a
//! control-plane HTTP API to fetch its job descriptor and report outputs,
//! and turns those outputs into pull requests on the host.
//!
//! | Module       | Responsibility                                    |
//! |--------------|----------------------------------------------------|
//! | `config`     | Parsed orchestrator configuration                  |
//! | `job`        | Job descriptor model, builder and live registry    |
//! | `api`        | Control-plane HTTP API the updater reports to      |
//! | `outputs`    | Output payloads and the PR state machine           |
//! | `runner`     | Docker-backed container execution driver           |
//! | `scheduler`  | Sequential per-block job scheduling                |
//! | `host`       | Host PR client contract + GitHub implementation    |
//! | `advisories` | Security-advisory sources                          |
//! | `redact`     | Secret masking for logs                            |
//! | `errors`     | Typed error hierarchy                              |

pub mod advisories;
pub mod api;
pub mod config;
pub mod errors;
pub mod host;
pub mod job;
pub mod outputs;
pub mod redact;
pub mod runner;
pub mod scheduler;
