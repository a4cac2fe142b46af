//! # Rule Harvest
//!
//! Aggregates detection-rule files published across many third-party
//! repositories into one deduplicated, tag-organized, validated corpus.
//!
//! Each run discovers new source repositories, brings their local working
//! copies up to date, routes every new unique rule file into one staging
//! area per declared tag, checks each staged copy with an external
//! validator, and migrates the survivors into the corpus before rewriting
//! the corpus index.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌─────────┐
//! │ Discovery │──▶│   Sync   │──▶│ Categorize │──▶│ Validate │──▶│ Migrate │──▶ poc.txt
//! │  GitHub   │   │ git × P  │   │ dedup+tags │   │ checker  │   │  corpus │
//! └───────────┘   └──────────┘   └────────────┘   └──────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest run                   # discover, sync, categorize, validate, migrate
//! harvest run --skip-sync       # re-process the already-synced tree
//! harvest sources               # registry and working-copy status
//! harvest stats                 # per-tag corpus counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and fatality rules |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`progress`] | Operator progress reporting |
//! | [`traits`] | Discovery, source, and checker seams |
//! | [`registry`] | Persisted source URL set |
//! | [`discovery`] | GitHub repository search |
//! | [`connector_git`] | Git working copies |
//! | [`sync`] | Bounded, retrying sync scheduler |
//! | [`fingerprint`] | Content fingerprints |
//! | [`dedup`] | Run-scoped deduplication index |
//! | [`tags`] | Rule metadata tag extraction |
//! | [`categorize`] | Tag fan-out into staging |
//! | [`validate`] | External checker and staging validation |
//! | [`migrate`] | Staging to corpus migration |
//! | [`index`] | Corpus index file |
//! | [`pipeline`] | Stage sequencing and interrupt handling |
//! | [`pool`] | Bounded task pools |
//! | [`fsutil`] | Filesystem helpers |
//! | [`sources`] | `harvest sources` listing |
//! | [`stats`] | `harvest stats` summary |

pub mod categorize;
pub mod config;
pub mod connector_git;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod fsutil;
pub mod index;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod sources;
pub mod stats;
pub mod sync;
pub mod tags;
pub mod traits;
pub mod validate;
