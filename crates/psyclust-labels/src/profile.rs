//! Profile assembly: one Markdown document per finalized cluster record.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::ClusterLabelRecord;
use crate::store::LabelStore;

pub const NO_TRAITS: &str = "None listed";

/// Render `record` as a profile stamped with `generated_at`.
pub fn render_profile(record: &ClusterLabelRecord, generated_at: DateTime<Utc>) -> String {
    let label = record.label.as_deref().unwrap_or("No Label");
    let traits = if record.traits.is_empty() {
        NO_TRAITS.to_string()
    } else {
        record.traits.join(", ")
    };

    let mut md = String::new();
    let _ = writeln!(md, "# Cluster Profile: {label}\n");
    let _ = writeln!(md, "**Cluster ID:** {}  ", record.cluster_id);
    let _ = writeln!(md, "**Generated:** {}\n", generated_at.format("%Y-%m-%d %H:%M UTC"));
    md.push_str("---\n\n## Dominant Traits\n");
    let _ = writeln!(md, "{traits}\n");
    md.push_str("---\n\n## Psychological Structure\n");
    let _ = writeln!(md, "{}\n", record.structure);

    if !record.dominant_traits.is_empty() {
        md.push_str("---\n\n## Aggregate Signals\n");
        for (name, value) in &record.dominant_traits {
            match value {
                Some(v) => {
                    let _ = writeln!(md, "- {name}: {v:.4}");
                }
                None => {
                    let _ = writeln!(md, "- {name}: n/a");
                }
            }
        }
        md.push('\n');
    }

    if !record.common_defenses.is_empty() {
        md.push_str("---\n\n## Common Defenses\n");
        for (name, count) in &record.common_defenses {
            let _ = writeln!(md, "- {name} ({count})");
        }
        md.push('\n');
    }

    if !record.sample_posts.is_empty() {
        md.push_str("---\n\n## Top Example Posts\n");
        for (i, post) in record.sample_posts.iter().enumerate() {
            let _ = writeln!(md, "\n{}. {}", i + 1, post.text.replace('\n', " "));
            if let Some(v) = post.valence {
                let _ = writeln!(md, "   - valence: {v:.3}");
            }
            if let Some(c) = post.complexity {
                let _ = writeln!(md, "   - complexity: {c:.3}");
            }
            if let Some(defenses) = post.detected_defenses.as_ref().filter(|d| !d.is_empty()) {
                let _ = writeln!(md, "   - defenses: {}", defenses.join(", "));
            }
        }
        md.push('\n');
    }
    md
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub written: Vec<(u32, PathBuf)>,
    /// `(final file name, reason)` for each record skipped as malformed.
    pub skipped: Vec<(String, String)>,
}

/// Render every finalized record. Malformed records are logged and skipped;
/// an existing profile for the same cluster is overwritten.
pub fn assemble_profiles(store: &LabelStore, generated_at: DateTime<Utc>) -> Result<AssemblyReport> {
    let mut report = AssemblyReport::default();
    for (name, record) in store.load_finals()? {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_recoverable() => {
                tracing::warn!(record = %name, error = %err, "skipping malformed final record");
                report.skipped.push((name, err.to_string()));
                continue;
            }
            Err(err) => return Err(err),
        };
        let path = store.write_profile(record.cluster_id, &render_profile(&record, generated_at))?;
        tracing::info!(cluster_id = record.cluster_id, path = %path.display(), "profile written");
        report.written.push((record.cluster_id, path));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SamplePost;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap()
    }

    #[test]
    fn empty_traits_render_as_none_listed() {
        let mut record = ClusterLabelRecord::new(7);
        record.label = Some("Hollow Mirror".into());
        record.structure = "Display guarding a wound of invisibility.".into();
        let md = render_profile(&record, at());
        assert!(md.starts_with("# Cluster Profile: Hollow Mirror\n"));
        assert!(md.contains("**Cluster ID:** 7"));
        assert!(md.contains("**Generated:** 2024-03-05 14:07 UTC"));
        assert!(md.contains("## Dominant Traits\nNone listed\n"));
        assert!(md.contains("Display guarding a wound of invisibility."));
        assert!(!md.contains("Top Example Posts"));
    }

    #[test]
    fn traits_are_comma_joined_and_samples_listed() {
        let mut record = ClusterLabelRecord::new(1);
        record.traits = vec!["shame".into(), "grandiosity".into()];
        record.sample_posts.push(SamplePost {
            text: "line one\nline two".into(),
            valence: Some(-0.5),
            ..Default::default()
        });
        let md = render_profile(&record, at());
        assert!(md.contains("# Cluster Profile: No Label"));
        assert!(md.contains("shame, grandiosity"));
        assert!(md.contains("1. line one line two"));
        assert!(md.contains("valence: -0.500"));
    }

    #[test]
    fn common_defenses_get_their_own_section() {
        let mut record = ClusterLabelRecord::new(2);
        record.common_defenses = vec![("denial".into(), 3), ("projection".into(), 1)];
        record.sample_posts.push(SamplePost {
            text: "not my problem".into(),
            detected_defenses: Some(vec!["denial".into()]),
            ..Default::default()
        });
        let md = render_profile(&record, at());
        assert!(md.contains("## Common Defenses\n- denial (3)\n- projection (1)\n"));
        assert!(md.contains("   - defenses: denial"));
        assert!(!render_profile(&ClusterLabelRecord::new(2), at()).contains("Common Defenses"));
    }

    #[test]
    fn rendering_is_deterministic_for_a_fixed_timestamp() {
        let record = ClusterLabelRecord::new(3);
        assert_eq!(render_profile(&record, at()), render_profile(&record, at()));
    }
}
