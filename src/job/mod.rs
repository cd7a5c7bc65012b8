//! Job model, builder and registry.
//!
//! | Module     | Responsibility                                         |
//! |------------|--------------------------------------------------------|
//! | `spec`     | Job descriptor wire model (`job.json`) and credentials |
//! | `builder`  | Pure update-block → job-descriptor mapping             |
//! | `registry` | Live-job state: tokens, ledger, reported outputs       |

pub mod builder;
pub mod registry;
pub mod spec;

pub use builder::{JobBuilder, UpdateJobInputs, generate_job_id};
pub use registry::{AffectedPrs, JobContext, JobRegistry, JobTokens};
pub use spec::{Credential, JobFile, JobSpec};
