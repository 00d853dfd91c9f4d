//! # artship
//!
//! Publishes build output to a separate "artifact" git repository, on a
//! branch named after the source ref that produced it.
//!
//! Every push to `refs/heads/<branch>` in the source repository becomes a
//! commit on `<branch>` in the artifact repository. That commit holds only the
//! built files plus a `BUILD_INFO` provenance record. Its message starts with
//! the short source hash, and it carries the source committer's identity. A
//! monorepo with `workspaces` publishes each member to its own artifact
//! repository, concurrently.
//!
//! ## Pipeline
//!
//! For each [`types::SourceUnit`]:
//!
//! 1. [`refs`] resolves the source ref and strips its namespace
//!    (`refs/heads/feature/x` becomes `feature/x`).
//! 2. [`descriptor`] describes the source commit from the CI event payload
//!    or from history.
//! 3. [`hosting`] makes sure the artifact repository exists. Failures here
//!    are warnings.
//! 4. [`staging`] resets the local staging clone and ends it on the target
//!    branch, fetched or freshly created.
//! 5. [`stager`] copies the build directory (or the filtered source tree)
//!    into the clone and writes `BUILD_INFO`.
//! 6. [`publish`] commits everything and force-pushes the branch.
//!
//! [`engine_parallel::run_units`] runs one pipeline per unit and gathers a
//! [`types::RunReceipt`].
//!
//! ## Modules
//!
//! - [`workspace`]: Unit discovery from `package.json` workspaces
//! - [`config`]: `.artship.toml` loading and merging with CLI values
//! - [`auth`]: Hosting token resolution
//! - [`environment`]: CI detection and the trigger context
//! - [`engine`]: The [`engine::Reporter`] trait and the per-unit pipeline
//! - [`receipt`]: Receipt persistence

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod engine_parallel;
pub mod environment;
pub mod hosting;
pub mod publish;
pub mod receipt;
pub mod refs;
pub mod stager;
pub mod staging;
pub mod types;
pub mod workspace;

pub use artship_git as git;
