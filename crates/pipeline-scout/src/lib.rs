// Copyright 2026 Pipeline Scout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline Scout: adaptive content acquisition for drug-pipeline pages.
//!
//! For a named company the [`orchestrator::Orchestrator`] discovers
//! candidate URLs, fetches each through a two-tier HTTP/browser cascade,
//! and sends sufficient content to a metered extraction service gated by
//! the durable [`quota::QuotaGovernor`].

pub mod acquisition;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod orchestrator;
pub mod quota;
pub mod renderer;
pub mod sink;

pub use acquisition::{AcquisitionCascade, AcquisitionError, AcquisitionErrorKind, Acquirer};
pub use config::ScoutConfig;
pub use discovery::{CandidateUrl, DiscoveryEngine, SearchEngine};
pub use error::{ScoutError, ScoutResult};
pub use extraction::{ExtractionError, ExtractionService, OpenAiExtractor};
pub use orchestrator::{Orchestrator, RunReport, TargetRun, TargetStatus};
pub use quota::{QuotaGovernor, QuotaLimits};
pub use renderer::{NoopRenderer, Renderer};
