//! Summary statistics over scored rows.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::construction::FormatType;
use crate::scoring::ResultRow;

/// One (salient task, format) group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    /// Task name, or `"unassigned"` for rows without one.
    pub salient_task: String,
    pub format_type: FormatType,
    pub n: usize,
    pub mean_percent: f64,
    /// Half-width of the 95% interval on the mean. `None` below two rows.
    pub ci95_half_width: Option<f64>,
    pub mean_accuracy: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub groups: Vec<GroupSummary>,
    pub total_rows: usize,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Student-t half-width of the 95% confidence interval for the mean.
pub fn ci95_half_width(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    let t = StudentsT::new(0.0, 1.0, (n - 1) as f64).ok()?;
    Some(t.inverse_cdf(0.975) * var.sqrt() / (n as f64).sqrt())
}

pub fn build_report(rows: &[ResultRow]) -> Report {
    let mut groups: BTreeMap<(String, &'static str), (FormatType, Vec<f64>, Vec<f64>)> =
        BTreeMap::new();
    for row in rows {
        let task = row
            .salient_task
            .map_or_else(|| "unassigned".to_string(), |t| t.to_string());
        let entry = groups
            .entry((task, row.format_type.as_str()))
            .or_insert_with(|| (row.format_type, Vec::new(), Vec::new()));
        entry.1.push(row.percent);
        entry.2.push(if row.accurate { 1.0 } else { 0.0 });
    }

    let groups = groups
        .into_iter()
        .map(|((salient_task, _), (format_type, percents, accuracy))| GroupSummary {
            salient_task,
            format_type,
            n: percents.len(),
            mean_percent: mean(&percents),
            ci95_half_width: ci95_half_width(&percents),
            mean_accuracy: mean(&accuracy),
        })
        .collect();

    Report {
        groups,
        total_rows: rows.len(),
    }
}

pub fn render_report_markdown(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# AmbiBench summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Rows: {}", report.total_rows);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "| salient task | format | n | mean % | 95% CI | accuracy |"
    );
    let _ = writeln!(out, "|---|---|---:|---:|---:|---:|");
    for g in &report.groups {
        let ci = g
            .ci95_half_width
            .map_or_else(|| "-".to_string(), |h| format!("±{h:.2}"));
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.2} | {} | {:.3} |",
            g.salient_task, g.format_type, g.n, g.mean_percent, ci, g.mean_accuracy
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::{ConstructionType, FeatureTask};

    fn row(task: Option<FeatureTask>, format: FormatType, percent: f64, accurate: bool) -> ResultRow {
        ResultRow {
            construction_type: ConstructionType::SubjectLocation,
            salient_task: task,
            format_type: format,
            construction: "The critic is in the theatre.".into(),
            task_a_label: true,
            task_b_label: true,
            active_task_label: true,
            token: "X".into(),
            percent,
            top_k: BTreeMap::new(),
            accurate,
            example_number: 1,
        }
    }

    #[test]
    fn ci_matches_t_table() {
        // n=5, sd=sqrt(2.5), t(0.975, 4)=2.776
        let h = ci95_half_width(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let expected = 2.776_445 * (2.5f64).sqrt() / (5f64).sqrt();
        assert!((h - expected).abs() < 1e-4, "{h} vs {expected}");
        assert!(ci95_half_width(&[3.0]).is_none());
    }

    #[test]
    fn groups_by_task_and_format() {
        let rows = vec![
            row(Some(FeatureTask::Subject), FormatType::Qa, 80.0, true),
            row(Some(FeatureTask::Subject), FormatType::Qa, 60.0, false),
            row(Some(FeatureTask::Subject), FormatType::Arrow, 50.0, true),
            row(None, FormatType::Arrow, 10.0, false),
        ];
        let report = build_report(&rows);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.groups.len(), 3);

        let qa = report
            .groups
            .iter()
            .find(|g| g.salient_task == "subject" && g.format_type == FormatType::Qa)
            .unwrap();
        assert_eq!(qa.n, 2);
        assert!((qa.mean_percent - 70.0).abs() < 1e-9);
        assert!((qa.mean_accuracy - 0.5).abs() < 1e-9);
        assert!(qa.ci95_half_width.is_some());

        let md = render_report_markdown(&report);
        assert!(md.contains("| subject | qa | 2 | 70.00 |"));
        assert!(md.contains("| unassigned | arrow | 1 | 10.00 | - | 0.000 |"));
    }
}
