//! Aggregate recorded judge verdicts offline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use super::load_config;
use crate::cli::output::{output, score, truncate, CommandOutput};
use crate::domain::models::config::RefineryConfig;
use crate::domain::models::refinement::{
    ActionKind, AggregatedVerdict, IterationLog, LessonContent, PanelEvaluation,
    RefinementAction, Section, TaggedVerdict,
};
use crate::services::{EvaluatorAggregator, RefinementRouter, RoutingContext};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// JSON file holding a panel evaluation or a list of tagged verdicts
    #[arg(long, value_name = "FILE")]
    pub verdicts: PathBuf,

    /// Section locators in document order (default: taken from the issues)
    #[arg(long, value_delimiter = ',')]
    pub sections: Vec<String>,
}

/// Accepted shapes of the verdicts file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerdictsFile {
    Panel(PanelEvaluation),
    Verdicts(Vec<TaggedVerdict>),
}

impl From<VerdictsFile> for PanelEvaluation {
    fn from(file: VerdictsFile) -> Self {
        match file {
            VerdictsFile::Panel(panel) => panel,
            VerdictsFile::Verdicts(verdicts) => Self {
                model_calls: verdicts.len() as u32,
                verdicts,
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AggregateOutput {
    pub verdict: AggregatedVerdict,
    pub band: ActionKind,
    pub action: RefinementAction,
}

impl CommandOutput for AggregateOutput {
    fn to_human(&self) -> String {
        let v = &self.verdict;
        let mut lines = vec![
            format!(
                "Composite: {}  Reliability: {}  Agreement: {}",
                score(v.composite_score),
                v.reliability,
                score(v.overall_agreement)
            ),
            format!(
                "Judges: {} responded, {} failed{}",
                v.judges_responded(),
                v.judges_failed.len(),
                if v.tiebreak_invoked { ", tiebreak invoked" } else { "" }
            ),
            String::new(),
            format!("{:<30} {:<8} {:<9}", "CRITERION", "SCORE", "AGREEMENT"),
            "-".repeat(49),
        ];

        for (criterion, value) in &v.criterion_scores {
            let agreement = v
                .per_criterion_agreement
                .get(criterion)
                .map_or_else(|| "-".to_string(), |a| score(*a));
            lines.push(format!(
                "{:<30} {:<8} {:<9}",
                criterion.as_str(),
                score(*value),
                agreement
            ));
        }

        if !v.merged_issues.is_empty() {
            lines.push(format!("\nIssues ({}):", v.merged_issues.len()));
            for merged in &v.merged_issues {
                let locations: Vec<&str> = merged.locations.iter().map(String::as_str).collect();
                lines.push(format!(
                    "  [{}] {} @ {} ({} judge(s)): {}",
                    merged.severity(),
                    merged.criterion(),
                    locations.join(","),
                    merged.agreement_count(),
                    truncate(&merged.issue.description, 60)
                ));
            }
        }

        for conflict in &v.conflicts {
            lines.push(format!(
                "  conflict @ {}: expand \"{}\" vs condense \"{}\"",
                conflict.location,
                truncate(&conflict.expand, 30),
                truncate(&conflict.condense, 30)
            ));
        }

        lines.push(format!("\nBand: {}", self.band));
        lines.push(format!("Action: {}", self.action.kind()));
        match &self.action {
            RefinementAction::Escalate { reason } => lines.push(format!("Reason: {reason}")),
            action => {
                if let Some(rec) = action.recommendation() {
                    lines.push(format!("Modify: {}", rec.sections_to_modify.join(", ")));
                    lines.push(format!("Preserve: {}", rec.sections_to_preserve.join(", ")));
                    if !rec.preserve_terminology.is_empty() {
                        lines.push(format!("Terms: {}", rec.preserve_terminology.join(", ")));
                    }
                }
            }
        }

        lines.join("\n")
    }
}

/// Section locators, in first-seen order, that the verdicts' issues point at.
fn sections_from_issues(panel: &PanelEvaluation) -> Vec<String> {
    let mut seen = Vec::new();
    for tagged in &panel.verdicts {
        for issue in &tagged.verdict.issues {
            let base = issue
                .location
                .split(['#', '/'])
                .next()
                .unwrap_or(&issue.location)
                .to_string();
            if !base.is_empty() && !seen.contains(&base) {
                seen.push(base);
            }
        }
    }
    seen
}

/// Aggregate a panel and route the result as a first round would be routed.
pub fn aggregate_and_route(
    config: &RefineryConfig,
    panel: &PanelEvaluation,
    sections: &[String],
) -> Result<AggregateOutput> {
    let aggregator = EvaluatorAggregator::new(config.rubric.clone(), config.aggregation.clone());
    let verdict = aggregator
        .aggregate(panel)
        .context("Failed to aggregate verdicts")?;

    let locators = if sections.is_empty() {
        sections_from_issues(panel)
    } else {
        sections.to_vec()
    };
    let content = LessonContent::new(
        "recorded verdicts",
        locators
            .iter()
            .map(|locator| Section::new(locator.as_str(), locator.as_str(), ""))
            .collect(),
    );

    let router = RefinementRouter::new(
        config.thresholds.clone(),
        &config.fix,
        config.aggregation.escalate_on_conflict,
    );
    let history = IterationLog::new();
    let action = router.route(&RoutingContext {
        verdict: &verdict,
        history: &history,
        content: &content,
        regressions: &[],
    });

    Ok(AggregateOutput {
        band: router.band(verdict.composite_score),
        verdict,
        action,
    })
}

fn read_panel(path: &Path) -> Result<PanelEvaluation> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read verdicts from {}", path.display()))?;
    let file: VerdictsFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse verdicts in {}", path.display()))?;
    Ok(file.into())
}

pub fn execute(args: &AggregateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let panel = read_panel(&args.verdicts)?;

    tracing::debug!(
        verdicts = panel.verdicts.len(),
        failures = panel.failures.len(),
        "aggregating recorded verdicts"
    );

    let out = aggregate_and_route(&config, &panel, &args.sections)?;
    output(&out, json_mode);
    Ok(())
}
