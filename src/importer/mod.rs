//! The import execution pipeline
//!
//! Everything between a trigger and a finished report: configuration
//! validation, CSV acquisition, row mapping, deduplication, slug
//! generation, record creation and template substitution, driven by the
//! batch loop and sequenced by [`run::ImportRun`].

pub mod batch;
pub mod dedup;
pub mod mapper;
pub mod run;
pub mod slug;
pub mod state_manager;
pub mod template;
pub mod validator;
pub mod writer;

pub use batch::BatchOrchestrator;
pub use run::ImportRun;
pub use state_manager::ImportStateManager;
pub use template::TemplateEngine;
pub use validator::ConfigValidator;
pub use writer::RecordWriter;
