//! Review lifecycle for drafted labels.
//!
//! ```text
//!            accept (final absent, or overwrite confirmed)
//!   DRAFT ─────────────────────────────────────────────► ACCEPTED
//!     │ ▲
//!     │ └──── EDITED (re-persisted; reviewed again next pass)
//!     │ edit
//!     ├── skip / invalid input / accept refused ─────────► SKIPPED
//!     └── quit ──────────────────────────────────────────► QUIT (batch ends)
//! ```
//!
//! [`transition`] is pure: it maps a state, an action and what is known about
//! the finals store to the next state plus the effects to perform.
//! [`ReviewSession`] performs those effects against a [`LabelStore`] and keeps
//! the run summary. Where actions come from (a console, a script) is behind
//! [`ActionSource`].

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result};
use crate::record::ClusterLabelRecord;
use crate::store::LabelStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Draft,
    Accepted,
    /// Transient: an edited record rests in `Draft` again.
    Edited,
    Skipped,
    Quit,
}

impl ReviewState {
    /// State a record rests in after a transition.
    pub fn resting(self) -> Self {
        match self {
            ReviewState::Edited => ReviewState::Draft,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewState::Draft => "draft",
            ReviewState::Accepted => "accepted",
            ReviewState::Edited => "edited",
            ReviewState::Skipped => "skipped",
            ReviewState::Quit => "quit",
        }
    }
}

impl std::fmt::Display for ReviewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field overrides supplied during an edit. Blank fields keep the prior value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditRequest {
    pub label: String,
    /// Comma-separated.
    pub traits: String,
    pub structure: String,
}

impl EditRequest {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn apply(&self, record: &ClusterLabelRecord) -> ClusterLabelRecord {
        let mut updated = record.clone();
        let label = self.label.trim();
        if !label.is_empty() {
            updated.label = Some(label.to_string());
        }
        if !self.traits.trim().is_empty() {
            updated.traits = self
                .traits
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        let structure = self.structure.trim();
        if !structure.is_empty() {
            updated.structure = structure.to_string();
        }
        updated
    }

    pub fn is_blank(&self) -> bool {
        self.label.trim().is_empty() && self.traits.trim().is_empty() && self.structure.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Accept,
    Edit(EditRequest),
    Skip,
    Quit,
    /// Operator input that is not a recognised command.
    Invalid { input: String },
}

/// Outcome recorded in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatus {
    Accepted,
    Edited,
    Skipped,
    /// Accept refused because a final for the cluster exists and overwrite
    /// was not confirmed.
    SkippedExists,
    /// The draft file could not be parsed.
    SkippedInvalid,
    /// The operator's input was not a command.
    SkippedInvalidInput,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Accepted => "Accepted",
            ReviewStatus::Edited => "Edited",
            ReviewStatus::Skipped => "Skipped",
            ReviewStatus::SkippedExists => "Skipped - Exists",
            ReviewStatus::SkippedInvalid => "Skipped - Invalid",
            ReviewStatus::SkippedInvalidInput => "Skipped - Invalid Input",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects requested by a transition, performed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Back up the draft, then move it into the finals store.
    Promote { overwrite: bool },
    /// Back up the current draft, then re-persist it with the edit applied.
    RewriteDraft(EditRequest),
    /// Append to the run summary.
    Record(ReviewStatus),
    /// Leave every remaining draft untouched and end the batch.
    AbandonRemaining,
}

/// What the session knows about the finals store when a decision is made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub final_exists: bool,
    pub overwrite_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ReviewState,
    pub effects: Vec<Effect>,
}

pub fn transition(
    state: ReviewState,
    action: &ReviewAction,
    ctx: TransitionContext,
) -> Result<Transition> {
    if state != ReviewState::Draft {
        return Err(LabelError::IllegalTransition {
            state: state.to_string(),
        });
    }
    let (state, effects) = match action {
        ReviewAction::Accept if ctx.final_exists && !ctx.overwrite_confirmed => (
            ReviewState::Skipped,
            vec![Effect::Record(ReviewStatus::SkippedExists)],
        ),
        ReviewAction::Accept => (
            ReviewState::Accepted,
            vec![
                Effect::Promote {
                    overwrite: ctx.final_exists,
                },
                Effect::Record(ReviewStatus::Accepted),
            ],
        ),
        ReviewAction::Edit(request) => (
            ReviewState::Edited,
            vec![
                Effect::RewriteDraft(request.clone()),
                Effect::Record(ReviewStatus::Edited),
            ],
        ),
        ReviewAction::Skip => (
            ReviewState::Skipped,
            vec![Effect::Record(ReviewStatus::Skipped)],
        ),
        ReviewAction::Invalid { .. } => (
            ReviewState::Skipped,
            vec![Effect::Record(ReviewStatus::SkippedInvalidInput)],
        ),
        ReviewAction::Quit => (ReviewState::Quit, vec![Effect::AbandonRemaining]),
    };
    Ok(Transition { state, effects })
}

/// A single-letter menu choice before any edit fields are collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Accept,
    Edit,
    Skip,
    Quit,
    Invalid(String),
}

/// Interpret operator input. Empty input means accept only in default-accept
/// mode; otherwise it is invalid like any unknown command.
pub fn parse_choice(input: &str, default_accept: bool) -> Choice {
    match input.trim().to_lowercase().as_str() {
        "" if default_accept => Choice::Accept,
        "a" | "accept" => Choice::Accept,
        "e" | "edit" => Choice::Edit,
        "s" | "skip" => Choice::Skip,
        "q" | "quit" => Choice::Quit,
        other => Choice::Invalid(other.to_string()),
    }
}

/// Where review decisions come from.
pub trait ActionSource {
    /// Decision for the draft `file_name`.
    fn next_action(
        &mut self,
        file_name: &str,
        record: &ClusterLabelRecord,
        default_accept: bool,
    ) -> Result<ReviewAction>;

    /// Asked only when accepting would replace an existing final.
    fn confirm_overwrite(&mut self, cluster_id: u32, final_path: &Path) -> Result<bool>;

    /// Progress notification after each processed draft.
    fn outcome(&mut self, _file_name: &str, _status: ReviewStatus) {}
}

/// Replays a fixed list of actions; running out means quit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedActions {
    pub actions: VecDeque<ReviewAction>,
    /// Answer to every overwrite confirmation.
    pub overwrite: bool,
}

impl ScriptedActions {
    pub fn new(actions: impl IntoIterator<Item = ReviewAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            overwrite: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl ActionSource for ScriptedActions {
    fn next_action(
        &mut self,
        _file_name: &str,
        _record: &ClusterLabelRecord,
        _default_accept: bool,
    ) -> Result<ReviewAction> {
        Ok(self.actions.pop_front().unwrap_or(ReviewAction::Quit))
    }

    fn confirm_overwrite(&mut self, _cluster_id: u32, _final_path: &Path) -> Result<bool> {
        Ok(self.overwrite)
    }
}

/// Ordered `(draft file, status)` pairs for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub entries: Vec<(String, ReviewStatus)>,
    /// The batch ended on `quit`.
    pub quit: bool,
}

impl ReviewSummary {
    pub fn count(&self, status: ReviewStatus) -> usize {
        self.entries.iter().filter(|(_, s)| *s == status).count()
    }

    /// One `<status>: <file>` line per entry.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(file, status)| format!("{status}: {file}\n"))
            .collect()
    }
}

/// One review pass over the draft store.
pub struct ReviewSession<'a> {
    store: &'a LabelStore,
    default_accept: bool,
}

impl<'a> ReviewSession<'a> {
    pub fn new(store: &'a LabelStore) -> Self {
        Self {
            store,
            default_accept: false,
        }
    }

    pub fn default_accept(mut self, enabled: bool) -> Self {
        self.default_accept = enabled;
        self
    }

    /// Review every draft once, in file-name order. The summary is written to
    /// the store even when the pass ends on `quit` or on an error.
    pub fn run(&self, source: &mut dyn ActionSource) -> Result<ReviewSummary> {
        let mut summary = ReviewSummary::default();
        let outcome = self.review_all(source, &mut summary);
        let persisted = self.store.write_summary(&summary.render());
        tracing::info!(
            processed = summary.entries.len(),
            accepted = summary.count(ReviewStatus::Accepted),
            edited = summary.count(ReviewStatus::Edited),
            quit = summary.quit,
            "review pass finished"
        );
        outcome?;
        persisted?;
        Ok(summary)
    }

    fn review_all(&self, source: &mut dyn ActionSource, summary: &mut ReviewSummary) -> Result<()> {
        for file_name in self.store.list_drafts()? {
            let record = match self.store.read_draft(&file_name) {
                Ok(record) => record,
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(draft = %file_name, error = %err, "skipping unreadable draft");
                    summary.entries.push((file_name.clone(), ReviewStatus::SkippedInvalid));
                    source.outcome(&file_name, ReviewStatus::SkippedInvalid);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let action = source.next_action(&file_name, &record, self.default_accept)?;
            let final_exists = self.store.final_exists(record.cluster_id);
            let overwrite_confirmed = match action {
                ReviewAction::Accept if final_exists => source
                    .confirm_overwrite(record.cluster_id, &self.store.final_path(record.cluster_id))?,
                _ => false,
            };
            let step = transition(
                ReviewState::Draft,
                &action,
                TransitionContext {
                    final_exists,
                    overwrite_confirmed,
                },
            )?;

            for effect in step.effects {
                match effect {
                    Effect::Promote { overwrite } => {
                        if overwrite {
                            tracing::warn!(cluster_id = record.cluster_id, "overwriting finalized record");
                        }
                        self.store.promote(&file_name, record.cluster_id)?;
                    }
                    Effect::RewriteDraft(request) => {
                        self.store.rewrite_draft(&file_name, &request.apply(&record))?;
                    }
                    Effect::Record(status) => {
                        tracing::debug!(draft = %file_name, status = %status, state = %step.state.resting(), "draft reviewed");
                        summary.entries.push((file_name.clone(), status));
                        source.outcome(&file_name, status);
                    }
                    Effect::AbandonRemaining => {
                        summary.quit = true;
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(final_exists: bool, overwrite_confirmed: bool) -> TransitionContext {
        TransitionContext {
            final_exists,
            overwrite_confirmed,
        }
    }

    #[test]
    fn accept_promotes_when_no_final_exists() {
        let t = transition(ReviewState::Draft, &ReviewAction::Accept, ctx(false, false)).unwrap();
        assert_eq!(t.state, ReviewState::Accepted);
        assert_eq!(
            t.effects,
            vec![
                Effect::Promote { overwrite: false },
                Effect::Record(ReviewStatus::Accepted)
            ]
        );
    }

    #[test]
    fn accept_over_existing_final_needs_confirmation() {
        let refused = transition(ReviewState::Draft, &ReviewAction::Accept, ctx(true, false)).unwrap();
        assert_eq!(refused.state, ReviewState::Skipped);
        assert_eq!(refused.effects, vec![Effect::Record(ReviewStatus::SkippedExists)]);

        let confirmed = transition(ReviewState::Draft, &ReviewAction::Accept, ctx(true, true)).unwrap();
        assert_eq!(confirmed.effects[0], Effect::Promote { overwrite: true });
    }

    #[test]
    fn edit_is_transient_and_rests_in_draft() {
        let t = transition(
            ReviewState::Draft,
            &ReviewAction::Edit(EditRequest::label("Hollow Mirror")),
            ctx(false, false),
        )
        .unwrap();
        assert_eq!(t.state, ReviewState::Edited);
        assert_eq!(t.state.resting(), ReviewState::Draft);
        assert_eq!(t.effects[1], Effect::Record(ReviewStatus::Edited));
    }

    #[test]
    fn invalid_input_is_a_tagged_skip_and_quit_abandons() {
        let t = transition(
            ReviewState::Draft,
            &ReviewAction::Invalid { input: "x".into() },
            ctx(false, false),
        )
        .unwrap();
        assert_eq!(t.state, ReviewState::Skipped);
        assert_eq!(t.effects, vec![Effect::Record(ReviewStatus::SkippedInvalidInput)]);

        let q = transition(ReviewState::Draft, &ReviewAction::Quit, ctx(true, true)).unwrap();
        assert_eq!(q.state, ReviewState::Quit);
        assert_eq!(q.effects, vec![Effect::AbandonRemaining]);
    }

    #[test]
    fn only_drafts_transition() {
        for state in [ReviewState::Accepted, ReviewState::Skipped, ReviewState::Quit] {
            assert!(matches!(
                transition(state, &ReviewAction::Skip, ctx(false, false)),
                Err(LabelError::IllegalTransition { .. })
            ));
        }
    }

    #[test]
    fn default_accept_changes_only_empty_input() {
        assert_eq!(parse_choice("", true), Choice::Accept);
        assert_eq!(parse_choice("  ", false), Choice::Invalid(String::new()));
        assert_eq!(parse_choice("S", true), Choice::Skip);
        assert_eq!(parse_choice("e", false), Choice::Edit);
        assert_eq!(parse_choice("zz", true), Choice::Invalid("zz".into()));
    }

    #[test]
    fn edit_keeps_blank_fields_and_splits_traits() {
        let mut record = ClusterLabelRecord::new(1);
        record.label = Some("Old".into());
        record.structure = "kept".into();
        let updated = EditRequest {
            label: "  ".into(),
            traits: "grandiosity, , shame ,".into(),
            structure: String::new(),
        }
        .apply(&record);
        assert_eq!(updated.label.as_deref(), Some("Old"));
        assert_eq!(updated.traits, vec!["grandiosity", "shame"]);
        assert_eq!(updated.structure, "kept");
    }

    #[test]
    fn summary_renders_status_lines() {
        let summary = ReviewSummary {
            entries: vec![
                ("cluster_0_label_draft.json".into(), ReviewStatus::Accepted),
                ("cluster_1_label_draft.json".into(), ReviewStatus::SkippedInvalidInput),
            ],
            quit: false,
        };
        assert_eq!(
            summary.render(),
            "Accepted: cluster_0_label_draft.json\nSkipped - Invalid Input: cluster_1_label_draft.json\n"
        );
    }

    #[test]
    fn scripted_actions_parse_from_json() {
        let script: ScriptedActions = serde_json::from_str(
            r#"{"overwrite": true, "actions": [
                {"action": "edit", "label": "Hollow Mirror"},
                {"action": "accept"},
                {"action": "invalid", "input": "?"}
            ]}"#,
        )
        .unwrap();
        assert!(script.overwrite);
        assert_eq!(script.actions[0], ReviewAction::Edit(EditRequest::label("Hollow Mirror")));
        assert_eq!(script.actions[1], ReviewAction::Accept);
    }
}
