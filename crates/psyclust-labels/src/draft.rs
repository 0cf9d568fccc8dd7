//! Label drafting: per-cluster briefs out, draft records in.
//!
//! The core side is deterministic. For every non-noise cluster it computes
//! aggregate traits and picks representative posts by signal score. Turning a
//! brief into a label is the drafting collaborator's job; it may be an LLM
//! behind [`CompletionBackend`] or anything else implementing
//! [`DraftGenerator`]. A collaborator failure costs one cluster, not the batch.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use psyclust_pipeline::MergedTable;
use serde::{Deserialize, Serialize};

use crate::error::{CompletionError, LabelError, Result};
use crate::record::{ClusterLabelRecord, SamplePost};
use crate::store::LabelStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// Representative posts per cluster.
    pub top_n: usize,
    /// Excerpt length in characters.
    pub excerpt_chars: usize,
    pub text_column: String,
    /// Signal column; representatives are ranked by its absolute value.
    pub valence_column: String,
    pub complexity_column: String,
    /// List-valued column of detected defense mechanisms, when extracted.
    pub defenses_column: String,
    /// Columns averaged into `avg_<column>` aggregate traits.
    pub trait_columns: Vec<String>,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            excerpt_chars: 500,
            text_column: "selftext".to_string(),
            valence_column: "sentiment_polarity".to_string(),
            complexity_column: "sentiment_subjectivity".to_string(),
            defenses_column: "detected_defenses".to_string(),
            trait_columns: vec![
                "sentiment_polarity".to_string(),
                "sentiment_subjectivity".to_string(),
                "word_count".to_string(),
            ],
        }
    }
}

/// Everything the drafting collaborator gets for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBrief {
    pub cluster_id: u32,
    pub size: usize,
    pub dominant_traits: BTreeMap<String, Option<f64>>,
    /// Most frequent defenses among members, `(name, count)`.
    #[serde(default)]
    pub common_defenses: Vec<(String, usize)>,
    pub samples: Vec<SamplePost>,
}

/// Mean of each configured trait column over `members`.
///
/// Columns absent from the table are left out. A present column with no
/// finite value among the members maps to `None`.
pub fn summarize_traits(
    merged: &MergedTable,
    members: &[usize],
    config: &LabelingConfig,
) -> BTreeMap<String, Option<f64>> {
    let mut traits = BTreeMap::new();
    for column in &config.trait_columns {
        if merged.column_index(column).is_none() {
            continue;
        }
        let values: Vec<f64> = members
            .iter()
            .filter_map(|&row| merged.number(row, column))
            .collect();
        let mean = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        traits.insert(format!("avg_{column}"), mean);
    }
    traits
}

/// Up to `top_n` members ranked by |valence|, highest first. The stored signal
/// values are used as-is. Ties keep ledger order; members without a valence
/// rank last.
pub fn select_representatives(
    merged: &MergedTable,
    members: &[usize],
    config: &LabelingConfig,
) -> Vec<SamplePost> {
    let mut ranked: Vec<(usize, Option<f64>)> = members
        .iter()
        .map(|&row| (row, merged.number(row, &config.valence_column).map(f64::abs)))
        .collect();
    // Stable sort: equal scores keep member (ledger) order.
    ranked.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    ranked
        .into_iter()
        .take(config.top_n)
        .map(|(row, _)| SamplePost {
            text: excerpt(merged.text(row, &config.text_column).unwrap_or(""), config.excerpt_chars),
            valence: merged.number(row, &config.valence_column),
            complexity: merged.number(row, &config.complexity_column),
            detected_defenses: merged.text(row, &config.defenses_column).map(parse_defenses),
        })
        .collect()
}

/// Defenses listed in one cell, written either as a JSON array or as a
/// bracketed, quoted list (`['denial', 'projection']`).
pub fn parse_defenses(cell: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(cell) {
        return list.into_iter().filter(|d| !d.trim().is_empty()).collect();
    }
    let inner = cell.trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(inner);
    inner
        .split(',')
        .map(|d| d.trim().trim_matches(|c: char| c == '\'' || c == '"').trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

pub const COMMON_DEFENSES: usize = 5;

/// The [`COMMON_DEFENSES`] most frequent defenses across `members`. Ties keep
/// first-seen order.
pub fn common_defenses(
    merged: &MergedTable,
    members: &[usize],
    config: &LabelingConfig,
) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for &row in members {
        let Some(cell) = merged.text(row, &config.defenses_column) else {
            continue;
        };
        for defense in parse_defenses(cell) {
            match counts.iter_mut().find(|(name, _)| *name == defense) {
                Some((_, n)) => *n += 1,
                None => counts.push((defense, 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(COMMON_DEFENSES);
    counts
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// One brief per non-noise cluster, in cluster id order.
pub fn build_briefs(merged: &MergedTable, config: &LabelingConfig) -> Vec<ClusterBrief> {
    merged
        .cluster_ids()
        .into_iter()
        .map(|cluster_id| {
            let members = merged.members(cluster_id);
            ClusterBrief {
                cluster_id,
                size: members.len(),
                dominant_traits: summarize_traits(merged, &members, config),
                common_defenses: common_defenses(merged, &members, config),
                samples: select_representatives(merged, &members, config),
            }
        })
        .collect()
}

pub const SYSTEM_PROMPT: &str = "You are a clinical psychological profiler.";

/// Prompt asking for a label, dominant traits and a structural narrative in
/// the shape [`parse_draft_response`] reads.
pub fn build_prompt(brief: &ClusterBrief) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are mapping psycho-symbolic complexes across a corpus of online posts.\n\n\
         For the cluster below:\n\
         - Give a symbolic label for the core defensive or existential pattern.\n\
         - Identify 3-5 dominant psychological features or contradictions.\n\
         - In 1-2 sentences, infer the underlying wound and the strategies protecting it.\n\
         Focus on structure rather than surface emotion. Keep the language clinical and precise.\n\n",
    );
    let _ = writeln!(prompt, "Cluster {} ({} posts)", brief.cluster_id, brief.size);
    prompt.push_str("Aggregate Traits:\n");
    for (name, value) in &brief.dominant_traits {
        match value {
            Some(v) => {
                let _ = writeln!(prompt, "- {name}: {v:.4}");
            }
            None => {
                let _ = writeln!(prompt, "- {name}: n/a");
            }
        }
    }
    if !brief.common_defenses.is_empty() {
        let listed: Vec<String> = brief
            .common_defenses
            .iter()
            .map(|(name, n)| format!("{name} ({n})"))
            .collect();
        let _ = writeln!(prompt, "- common_defenses: {}", listed.join(", "));
    }
    prompt.push_str("\nRepresentative Posts:\n");
    for (i, post) in brief.samples.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "\n[{}] {}\nValence: {} | Complexity: {}",
            i + 1,
            post.text,
            fmt_signal(post.valence),
            fmt_signal(post.complexity)
        );
        if let Some(defenses) = &post.detected_defenses {
            let _ = writeln!(prompt, "Defenses: {}", defenses.join(", "));
        }
    }
    prompt.push_str(
        "\nReturn strictly:\n\
         - Label: (2-4 words, symbolic, archetypal if possible)\n\
         - Dominant Traits:\n  - (feature 1)\n  - (feature 2)\n  - (feature 3)\n\
         - Inferred Psychological Structure:\n  (1-2 sentences, clinical narrative)\n",
    );
    prompt
}

fn fmt_signal(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}

/// Fields recovered from a free-text drafting response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDraft {
    pub label: Option<String>,
    pub traits: Vec<String>,
    pub structure: String,
}

/// Tolerant parser for `Label:` / `Dominant Traits:` / `Inferred Psychological
/// Structure:` sections. Leading bullets on headers are ignored; anything
/// unrecognised is dropped rather than rejected.
pub fn parse_draft_response(text: &str) -> ParsedDraft {
    #[derive(PartialEq)]
    enum Section {
        None,
        Traits,
        Structure,
    }

    let mut parsed = ParsedDraft::default();
    let mut section = Section::None;
    let mut structure: Vec<&str> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        let header = line.trim_start_matches(['-', '*', ' ']).trim();
        let lower = header.to_ascii_lowercase();

        if let Some(pos) = lower.find("label:") {
            let value = header[pos + "label:".len()..].trim();
            if !value.is_empty() {
                parsed.label = Some(value.to_string());
            }
            section = Section::None;
        } else if lower.starts_with("dominant traits:") {
            section = Section::Traits;
            let inline = header["dominant traits:".len()..].trim();
            if !inline.is_empty() {
                parsed.traits.push(inline.to_string());
            }
        } else if lower.starts_with("inferred psychological structure:") {
            section = Section::Structure;
            let inline = header["inferred psychological structure:".len()..].trim();
            if !inline.is_empty() {
                structure.push(inline);
            }
        } else if section == Section::Traits && line.starts_with('-') {
            let item = line.trim_start_matches('-').trim();
            if !item.is_empty() {
                parsed.traits.push(item.to_string());
            }
        } else if section == Section::Structure && !line.is_empty() {
            structure.push(line);
        }
    }
    parsed.structure = structure.join(" ");
    parsed
}

/// Request handed to a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Blocking text completion service.
pub trait CompletionBackend {
    fn complete(&self, cluster_id: u32, request: &CompletionRequest) -> std::result::Result<String, CompletionError>;

    fn name(&self) -> &str;
}

/// Turns a brief into a draft record.
pub trait DraftGenerator {
    fn draft(&self, brief: &ClusterBrief) -> Result<ClusterLabelRecord>;
}

/// Prompt → backend → tolerant parse.
pub struct PromptedDraftGenerator<B> {
    backend: B,
    max_tokens: usize,
    temperature: f32,
}

impl<B: CompletionBackend> PromptedDraftGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_tokens: 1000,
            temperature: 0.3,
        }
    }

    pub fn with_sampling(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

impl<B: CompletionBackend> DraftGenerator for PromptedDraftGenerator<B> {
    fn draft(&self, brief: &ClusterBrief) -> Result<ClusterLabelRecord> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(brief),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let response = self
            .backend
            .complete(brief.cluster_id, &request)
            .map_err(|e| LabelError::ExternalCollaborator {
                cluster_id: brief.cluster_id,
                message: format!("{}: {e}", self.backend.name()),
            })?;
        let parsed = parse_draft_response(&response);
        if parsed.label.is_none() {
            tracing::warn!(cluster_id = brief.cluster_id, "no label found in drafting response");
        }
        Ok(ClusterLabelRecord {
            cluster_id: brief.cluster_id,
            label: parsed.label,
            traits: parsed.traits,
            structure: parsed.structure,
            dominant_traits: brief.dominant_traits.clone(),
            common_defenses: brief.common_defenses.clone(),
            sample_posts: brief.samples.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftRunReport {
    /// `(cluster id, draft file name)` for every draft written.
    pub written: Vec<(u32, String)>,
    /// `(cluster id, reason)` for every cluster that failed.
    pub failed: Vec<(u32, String)>,
}

/// Draft every brief and persist the results. Per-cluster collaborator
/// failures are logged and reported; store failures end the run.
pub fn generate_drafts(
    generator: &dyn DraftGenerator,
    briefs: &[ClusterBrief],
    store: &LabelStore,
) -> Result<DraftRunReport> {
    let mut report = DraftRunReport::default();
    for brief in briefs {
        match generator.draft(brief) {
            Ok(record) => {
                let file_name = store.write_draft(&record)?;
                tracing::info!(
                    cluster_id = brief.cluster_id,
                    label = record.label.as_deref().unwrap_or("<none>"),
                    draft = %file_name,
                    "draft written"
                );
                report.written.push((brief.cluster_id, file_name));
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!(cluster_id = brief.cluster_id, error = %err, "drafting failed; continuing");
                report.failed.push((brief.cluster_id, err.to_string()));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyclust_pipeline::{ClusterTable, EmbeddingSet, FeatureTable, FeatureValue, IdentityLedger, PostId};

    fn merged() -> MergedTable {
        let ids: Vec<PostId> = ["a", "b", "c", "d", "e"].iter().map(|s| PostId::from(*s)).collect();
        let ledger = IdentityLedger::new(ids.clone()).unwrap();
        let texts = ["calm", "furious héllo", "meh", "ecstatic", "noise"];
        let valence = [0.1, -0.9, 0.9, 0.5, 0.0];
        let features = FeatureTable::new(
            ids.clone(),
            vec!["selftext".into(), "sentiment_polarity".into(), "word_count".into()],
            (0..5)
                .map(|i| {
                    vec![
                        FeatureValue::Text(texts[i].into()),
                        FeatureValue::Number(valence[i]),
                        FeatureValue::Number((i + 1) as f64 * 10.0),
                    ]
                })
                .collect(),
        )
        .unwrap();
        let clusters =
            ClusterTable::from_legacy(ids.clone(), &[0, 0, 0, 1, -1], &[0.9, 0.8, 0.7, 1.0, 0.0]).unwrap();
        let embeddings = EmbeddingSet::from_rows(ids, (0..5).map(|i| vec![i as f32]).collect()).unwrap();
        psyclust_pipeline::merge(&ledger, &features, &clusters, &embeddings).unwrap()
    }

    #[test]
    fn traits_average_present_columns_only() {
        let m = merged();
        let traits = summarize_traits(&m, &m.members(0), &LabelingConfig::default());
        assert_eq!(traits.len(), 2);
        assert!((traits["avg_word_count"].unwrap() - 20.0).abs() < 1e-9);
        assert!((traits["avg_sentiment_polarity"].unwrap() - 0.1 / 3.0).abs() < 1e-9);
        assert!(!traits.contains_key("avg_sentiment_subjectivity"));
    }

    #[test]
    fn representatives_rank_by_magnitude_with_ledger_tiebreak() {
        let m = merged();
        let config = LabelingConfig {
            top_n: 2,
            excerpt_chars: 8,
            ..Default::default()
        };
        let posts = select_representatives(&m, &m.members(0), &config);
        assert_eq!(posts.len(), 2);
        // |-0.9| ties |0.9|; row b precedes row c in the ledger.
        assert_eq!(posts[0].text, "furious ");
        assert_eq!(posts[0].valence, Some(-0.9));
        assert_eq!(posts[1].text, "meh");
        assert_eq!(posts[1].complexity, None);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("abc", 10), "abc");
    }

    #[test]
    fn briefs_cover_non_noise_clusters() {
        let briefs = build_briefs(&merged(), &LabelingConfig::default());
        assert_eq!(briefs.iter().map(|b| b.cluster_id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(briefs[0].size, 3);
        assert_eq!(briefs[1].samples.len(), 1);
        let prompt = build_prompt(&briefs[0]);
        assert!(prompt.contains("Cluster 0 (3 posts)"));
        assert!(prompt.contains("avg_word_count"));
    }

    fn merged_with_defenses() -> MergedTable {
        let ids: Vec<PostId> = ["a", "b", "c", "d"].iter().map(|s| PostId::from(*s)).collect();
        let ledger = IdentityLedger::new(ids.clone()).unwrap();
        let cells = ["['denial', 'projection']", r#"["denial", "splitting"]"#, "", "[]"];
        let features = FeatureTable::new(
            ids.clone(),
            vec!["selftext".into(), "sentiment_polarity".into(), "detected_defenses".into()],
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    vec![
                        FeatureValue::Text(format!("post {i}")),
                        FeatureValue::Number(0.1 * (i + 1) as f64),
                        FeatureValue::Text(cell.to_string()),
                    ]
                })
                .collect(),
        )
        .unwrap();
        let clusters = ClusterTable::from_legacy(ids.clone(), &[0, 0, 0, 0], &[1.0; 4]).unwrap();
        let embeddings = EmbeddingSet::from_rows(ids, (0..4).map(|i| vec![i as f32]).collect()).unwrap();
        psyclust_pipeline::merge(&ledger, &features, &clusters, &embeddings).unwrap()
    }

    #[test]
    fn defense_cells_parse_in_either_list_form() {
        assert_eq!(parse_defenses("['denial', 'projection']"), vec!["denial", "projection"]);
        assert_eq!(parse_defenses(r#"["isolation"]"#), vec!["isolation"]);
        assert_eq!(parse_defenses("humor"), vec!["humor"]);
        assert!(parse_defenses("[]").is_empty());
        assert!(parse_defenses("").is_empty());
    }

    #[test]
    fn common_defenses_count_across_members() {
        let m = merged_with_defenses();
        let briefs = build_briefs(&m, &LabelingConfig::default());
        assert_eq!(
            briefs[0].common_defenses,
            vec![("denial".to_string(), 2), ("projection".to_string(), 1), ("splitting".to_string(), 1)]
        );
        // Highest valence first: row d, then c, then b.
        let samples = &briefs[0].samples;
        assert_eq!(samples[0].detected_defenses, Some(Vec::new()));
        assert_eq!(samples[2].detected_defenses, Some(vec!["denial".to_string(), "splitting".to_string()]));
        let prompt = build_prompt(&briefs[0]);
        assert!(prompt.contains("- common_defenses: denial (2), projection (1), splitting (1)"));
        assert!(prompt.contains("Defenses: denial, splitting"));
    }

    #[test]
    fn no_defense_column_means_no_defenses() {
        let m = merged();
        let briefs = build_briefs(&m, &LabelingConfig::default());
        assert!(briefs[0].common_defenses.is_empty());
        assert!(briefs[0].samples.iter().all(|p| p.detected_defenses.is_none()));
    }

    #[test]
    fn parser_reads_sections_and_tolerates_bullets() {
        let parsed = parse_draft_response(
            "- Label: The Hollow Mirror\n\
             - Dominant Traits:\n  - grandiosity\n  - shame\n\
             - Inferred Psychological Structure:\n  A wound of invisibility\n  guarded by display.\n",
        );
        assert_eq!(parsed.label.as_deref(), Some("The Hollow Mirror"));
        assert_eq!(parsed.traits, vec!["grandiosity", "shame"]);
        assert_eq!(parsed.structure, "A wound of invisibility guarded by display.");
    }

    #[test]
    fn parser_yields_empty_fields_for_unstructured_text() {
        let parsed = parse_draft_response("I cannot help with that.");
        assert_eq!(parsed, ParsedDraft::default());
    }
}
