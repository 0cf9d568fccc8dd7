//! Psyclust label lifecycle
//!
//! From validated clusters to reviewed, human-readable profiles:
//!
//! ```text
//! merged table ─► briefs ─► drafting collaborator ─► drafts/
//!                                                      │
//!                       review (accept/edit/skip/quit) ◄┘
//!                          │            │
//!                     backups/  ◄──  finals/ ─► profiles/cluster_<id>.md
//! ```
//!
//! Malformed records and collaborator failures are isolated to the record or
//! cluster they affect; only store I/O failures end a run.

pub mod draft;
pub mod error;
pub mod profile;
pub mod record;
pub mod review;
pub mod store;

pub use draft::{
    build_briefs, build_prompt, common_defenses, generate_drafts, parse_defenses,
    parse_draft_response, ClusterBrief, CompletionBackend, CompletionRequest, DraftGenerator,
    DraftRunReport, LabelingConfig, ParsedDraft, PromptedDraftGenerator,
};
pub use error::{CompletionError, LabelError, Result};
pub use profile::{assemble_profiles, render_profile, AssemblyReport};
pub use record::{ClusterLabelRecord, SamplePost};
pub use review::{
    parse_choice, transition, ActionSource, Choice, EditRequest, Effect, ReviewAction,
    ReviewSession, ReviewState, ReviewStatus, ReviewSummary, ScriptedActions, Transition,
    TransitionContext,
};
pub use store::{LabelStore, LabelStoreLayout};
