//! Attack-path analysis and post-processing for Active Directory and Azure
//! property graphs.
//!
//! The crate has three layers:
//! - graph primitives: the store traits, criteria and the traversal engine
//! - fetch operations over common AD relationships, wrapped by delegates
//! - post-processing passes that derive edges and the pipeline that runs them

pub mod errors;
pub mod properties;
pub mod kinds;
pub mod graph_types;
pub mod query;
pub mod analysis_context;
pub mod graph_store;
pub mod traversal;
pub mod graph_ops;

// Fetch operations
pub mod group_membership;
pub mod sessions;
pub mod local_groups;
pub mod gpo_enforcement;
pub mod entity_control;
pub mod domain_trust;
pub mod containment;
pub mod foreign_membership;
pub mod dcsync;
pub mod completeness;
pub mod delegates;
pub mod lookups;

// Post-processing
pub mod parallel_executor;
pub mod post_processing;
pub mod group_expansion;
pub mod well_known;
pub mod domain_associations;
pub mod tier_zero;
pub mod post_dcsync;
pub mod post_trust_keys;
pub mod post_local_groups;
pub mod post_adcs;
pub mod post_owns;
pub mod post_gpos;
pub mod post_ntlm;
pub mod ad_post;
pub mod azure_post;
pub mod asset_group_isolation;
pub mod data_quality;
pub mod pipeline;

// Runtime
pub mod database;
pub mod config;
pub mod logging;

pub use analysis_context::{AnalysisContext, CancellationToken, CompositionCounter};
pub use errors::{AnalysisError, Result};
pub use graph_store::{GraphDatabase, MemoryGraph, Transaction, WriteTransaction};
pub use pipeline::{run_analysis, AnalysisOutcome, AnalysisStatus};
