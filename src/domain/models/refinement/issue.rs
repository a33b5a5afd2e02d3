//! Judge-reported issues, their merged form, and the per-session ledger.
//!
//! An [`Issue`] is immutable once a judge emits it. The aggregator folds
//! near-duplicate issues into [`MergedIssue`]s without touching the originals,
//! and the session's [`IssueLedger`] tracks every issue ever observed in
//! exactly one of three states: open, fixed, or superseded by regeneration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::criterion::Criterion;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How badly an issue hurts the lesson. Ordered `Minor < Major < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Critical and major issues justify section regeneration.
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::Major)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => f.write_str("minor"),
            Self::Major => f.write_str("major"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A single problem a judge found in the content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    /// The criterion this issue counts against.
    pub criterion: Criterion,
    /// How severe the issue is.
    pub severity: Severity,
    /// Opaque locator naming where the issue lives (usually a section
    /// locator, optionally suffixed with `#anchor` or `/path`).
    pub location: String,
    /// What is wrong.
    pub description: String,
    /// What the judge proposes doing about it.
    pub suggested_fix: String,
    /// The offending passage, when the judge quoted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
}

impl Issue {
    /// Create an issue without a quoted passage.
    pub fn new(
        criterion: Criterion,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
        suggested_fix: impl Into<String>,
    ) -> Self {
        Self {
            criterion,
            severity,
            location: location.into(),
            description: description.into(),
            suggested_fix: suggested_fix.into(),
            quoted_text: None,
        }
    }

    /// Attach the quoted passage.
    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quoted_text = Some(quote.into());
        self
    }

    /// Stable identity used by the ledger: criterion, location and the
    /// whitespace/case-normalised description.
    pub fn fingerprint(&self) -> IssueFingerprint {
        let normalized = self
            .description
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        IssueFingerprint(format!(
            "{}|{}|{}",
            self.criterion, self.location, normalized
        ))
    }
}

/// Ledger key for an issue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueFingerprint(pub String);

impl fmt::Display for IssueFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// MergedIssue
// ---------------------------------------------------------------------------

/// One or more judge issues folded together by the aggregator.
///
/// The representative issue carries the highest severity seen among the
/// merged reports. Supporting judges and all reported locations are unioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedIssue {
    /// The representative (highest-severity) issue.
    pub issue: Issue,
    /// Ids of every judge that reported this issue.
    pub supporting_judges: BTreeSet<String>,
    /// Every location the merged reports pointed at.
    pub locations: BTreeSet<String>,
    /// Fingerprints of every original issue folded into this one.
    pub merged_fingerprints: BTreeSet<IssueFingerprint>,
}

impl MergedIssue {
    /// Start a merged issue from a single judge report.
    pub fn from_issue(issue: Issue, judge_id: &str) -> Self {
        let mut supporting_judges = BTreeSet::new();
        supporting_judges.insert(judge_id.to_string());
        let mut locations = BTreeSet::new();
        locations.insert(issue.location.clone());
        let mut merged_fingerprints = BTreeSet::new();
        merged_fingerprints.insert(issue.fingerprint());
        Self {
            issue,
            supporting_judges,
            locations,
            merged_fingerprints,
        }
    }

    /// Fold another judge's report into this one.
    ///
    /// The representative switches to `other` only when it is strictly more
    /// severe, so merge order among equal severities is stable.
    pub fn absorb(&mut self, other: &Issue, judge_id: &str) {
        self.supporting_judges.insert(judge_id.to_string());
        self.locations.insert(other.location.clone());
        self.merged_fingerprints.insert(other.fingerprint());
        if other.severity > self.issue.severity {
            self.issue = other.clone();
        }
    }

    /// Number of judges that independently reported this issue.
    pub fn agreement_count(&self) -> usize {
        self.supporting_judges.len()
    }

    /// Severity of the representative issue.
    pub fn severity(&self) -> Severity {
        self.issue.severity
    }

    /// Criterion of the representative issue.
    pub fn criterion(&self) -> Criterion {
        self.issue.criterion
    }
}

/// Two merged issues at the same location that ask for opposite edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueConflict {
    /// Where the conflicting requests point.
    pub location: String,
    /// Suggestion asking to add or expand material.
    pub expand: String,
    /// Suggestion asking to cut or condense material.
    pub condense: String,
    /// Judges behind either side.
    pub judges: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// IssueLedger
// ---------------------------------------------------------------------------

/// Lifecycle state of an issue within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Reported and not yet verified as resolved.
    Open,
    /// Verified as resolved (fix confirmed, or no longer reported by a later
    /// full evaluation).
    Fixed,
    /// The material the issue pointed at was regenerated.
    Superseded,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The merged issue as last reported.
    pub issue: MergedIssue,
    /// Current status.
    pub status: IssueStatus,
    /// Iteration in which the issue was first observed.
    pub first_seen: u32,
    /// Iteration of the most recent status change.
    pub last_changed: u32,
}

/// Per-session record of every issue ever observed.
///
/// Entries are keyed by the fingerprint of their representative issue and
/// are never removed, so an issue cannot be dropped silently: it is always in
/// exactly one [`IssueStatus`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueLedger {
    entries: BTreeMap<IssueFingerprint, LedgerEntry>,
}

impl IssueLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the issues reported by a full evaluation.
    ///
    /// New issues enter `Open`; previously fixed or superseded issues that
    /// reappear are reopened. An open issue absent from `reported` moves to
    /// `Fixed` only when every judge that raised it is in `responded`; an
    /// issue whose judges sat the round out stays `Open`.
    pub fn observe(
        &mut self,
        reported: &[MergedIssue],
        responded: &BTreeSet<String>,
        iteration: u32,
    ) {
        let mut seen = BTreeSet::new();
        for merged in reported {
            let key = self.key_for(merged);
            seen.insert(key.clone());
            match self.entries.get_mut(&key) {
                Some(entry) => {
                    entry.issue = merged.clone();
                    if entry.status != IssueStatus::Open {
                        entry.status = IssueStatus::Open;
                        entry.last_changed = iteration;
                    }
                }
                None => {
                    self.entries.insert(
                        key,
                        LedgerEntry {
                            issue: merged.clone(),
                            status: IssueStatus::Open,
                            first_seen: iteration,
                            last_changed: iteration,
                        },
                    );
                }
            }
        }

        for (key, entry) in &mut self.entries {
            let rejudged = entry
                .issue
                .supporting_judges
                .iter()
                .all(|judge| responded.contains(judge));
            if entry.status == IssueStatus::Open && !seen.contains(key) && rejudged {
                entry.status = IssueStatus::Fixed;
                entry.last_changed = iteration;
            }
        }
    }

    /// Mark the given issues as verified fixed.
    pub fn mark_fixed(&mut self, issues: &[MergedIssue], iteration: u32) {
        self.transition(issues, IssueStatus::Fixed, iteration);
    }

    /// Mark the given issues as superseded by regeneration.
    pub fn mark_superseded(&mut self, issues: &[MergedIssue], iteration: u32) {
        self.transition(issues, IssueStatus::Superseded, iteration);
    }

    /// Supersede every open issue (full regeneration).
    pub fn supersede_all_open(&mut self, iteration: u32) {
        for entry in self.entries.values_mut() {
            if entry.status == IssueStatus::Open {
                entry.status = IssueStatus::Superseded;
                entry.last_changed = iteration;
            }
        }
    }

    /// Status of a merged issue, if it has been observed.
    pub fn status_of(&self, issue: &MergedIssue) -> Option<IssueStatus> {
        self.lookup(issue).map(|e| e.status)
    }

    /// All ledger entries in fingerprint order.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Currently open issues.
    pub fn open(&self) -> Vec<&MergedIssue> {
        self.with_status(IssueStatus::Open)
    }

    /// Issues in the given status.
    pub fn with_status(&self, status: IssueStatus) -> Vec<&MergedIssue> {
        self.entries
            .values()
            .filter(|e| e.status == status)
            .map(|e| &e.issue)
            .collect()
    }

    /// Number of issues in each status: `(open, fixed, superseded)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.entries
            .values()
            .fold((0, 0, 0), |(o, f, s), e| match e.status {
                IssueStatus::Open => (o + 1, f, s),
                IssueStatus::Fixed => (o, f + 1, s),
                IssueStatus::Superseded => (o, f, s + 1),
            })
    }

    /// Total number of tracked issues.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn transition(&mut self, issues: &[MergedIssue], status: IssueStatus, iteration: u32) {
        for merged in issues {
            let key = self.key_for(merged);
            if let Some(entry) = self.entries.get_mut(&key) {
                if entry.status != status {
                    entry.status = status;
                    entry.last_changed = iteration;
                }
            }
        }
    }

    /// Resolve a merged issue to its ledger key.
    ///
    /// A merged issue whose representative changed between rounds is still
    /// matched through any of the fingerprints it absorbed.
    fn key_for(&self, merged: &MergedIssue) -> IssueFingerprint {
        let primary = merged.issue.fingerprint();
        if self.entries.contains_key(&primary) {
            return primary;
        }
        merged
            .merged_fingerprints
            .iter()
            .find(|fp| self.entries.contains_key(*fp))
            .cloned()
            .unwrap_or(primary)
    }

    fn lookup(&self, merged: &MergedIssue) -> Option<&LedgerEntry> {
        self.entries.get(&self.key_for(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judges(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    fn issue(location: &str, severity: Severity, description: &str) -> Issue {
        Issue::new(
            Criterion::Clarity,
            severity,
            location,
            description,
            "Rephrase the passage",
        )
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Major.is_blocking());
        assert!(!Severity::Minor.is_blocking());
    }

    #[test]
    fn test_fingerprint_normalises_whitespace_and_case() {
        let a = issue("s1", Severity::Minor, "Jargon  is UNDEFINED");
        let b = issue("s1", Severity::Major, "jargon is undefined");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_absorb_keeps_highest_severity() {
        let mut merged = MergedIssue::from_issue(issue("s1", Severity::Minor, "vague"), "j1");
        merged.absorb(&issue("s1#p2", Severity::Critical, "vague claim"), "j2");
        merged.absorb(&issue("s1", Severity::Major, "vague"), "j3");

        assert_eq!(merged.severity(), Severity::Critical);
        assert_eq!(merged.agreement_count(), 3);
        assert_eq!(merged.locations.len(), 2);
        assert_eq!(merged.merged_fingerprints.len(), 3);
    }

    #[test]
    fn test_ledger_every_issue_in_exactly_one_state() {
        let mut ledger = IssueLedger::new();
        let a = MergedIssue::from_issue(issue("s1", Severity::Minor, "a"), "j1");
        let b = MergedIssue::from_issue(issue("s2", Severity::Major, "b"), "j1");
        let c = MergedIssue::from_issue(issue("s3", Severity::Minor, "c"), "j1");

        ledger.observe(&[a.clone(), b.clone(), c.clone()], &judges(&["j1"]), 1);
        assert_eq!(ledger.counts(), (3, 0, 0));

        ledger.mark_fixed(&[a.clone()], 1);
        ledger.mark_superseded(&[b.clone()], 1);
        assert_eq!(ledger.counts(), (1, 1, 1));
        assert_eq!(ledger.status_of(&a), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status_of(&b), Some(IssueStatus::Superseded));
        assert_eq!(ledger.status_of(&c), Some(IssueStatus::Open));

        let (o, f, s) = ledger.counts();
        assert_eq!(o + f + s, ledger.len());
    }

    #[test]
    fn test_ledger_unreported_open_issue_becomes_fixed() {
        let mut ledger = IssueLedger::new();
        let a = MergedIssue::from_issue(issue("s1", Severity::Minor, "a"), "j1");
        let b = MergedIssue::from_issue(issue("s2", Severity::Minor, "b"), "j1");
        ledger.observe(&[a.clone(), b.clone()], &judges(&["j1"]), 1);
        ledger.observe(&[b.clone()], &judges(&["j1"]), 2);

        assert_eq!(ledger.status_of(&a), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status_of(&b), Some(IssueStatus::Open));
    }

    #[test]
    fn test_ledger_keeps_issue_open_when_its_judge_is_absent() {
        let mut ledger = IssueLedger::new();
        let mut shared = MergedIssue::from_issue(issue("s1", Severity::Minor, "shared"), "cheap");
        shared.absorb(&issue("s1", Severity::Minor, "shared"), "primary");
        let primary_only =
            MergedIssue::from_issue(issue("s2", Severity::Major, "wrong sum"), "primary");
        ledger.observe(
            &[shared.clone(), primary_only.clone()],
            &judges(&["cheap", "primary"]),
            1,
        );

        // Only the cheap judge answers the next round and reports nothing.
        ledger.observe(&[], &judges(&["cheap"]), 2);
        assert_eq!(ledger.status_of(&primary_only), Some(IssueStatus::Open));
        assert_eq!(ledger.status_of(&shared), Some(IssueStatus::Open));

        // Once every supporting judge has re-judged the lesson clean, both close.
        ledger.observe(&[], &judges(&["cheap", "primary"]), 3);
        assert_eq!(ledger.status_of(&primary_only), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status_of(&shared), Some(IssueStatus::Fixed));
    }

    #[test]
    fn test_ledger_reopens_reported_issue() {
        let mut ledger = IssueLedger::new();
        let a = MergedIssue::from_issue(issue("s1", Severity::Minor, "a"), "j1");
        ledger.observe(&[a.clone()], &judges(&["j1"]), 1);
        ledger.mark_fixed(&[a.clone()], 1);
        ledger.observe(&[a.clone()], &judges(&["j1"]), 2);
        assert_eq!(ledger.status_of(&a), Some(IssueStatus::Open));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_supersede_all_open_leaves_fixed_alone() {
        let mut ledger = IssueLedger::new();
        let a = MergedIssue::from_issue(issue("s1", Severity::Minor, "a"), "j1");
        let b = MergedIssue::from_issue(issue("s2", Severity::Minor, "b"), "j1");
        ledger.observe(&[a.clone(), b.clone()], &judges(&["j1"]), 1);
        ledger.mark_fixed(&[a.clone()], 1);
        ledger.supersede_all_open(2);
        assert_eq!(ledger.status_of(&a), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status_of(&b), Some(IssueStatus::Superseded));
    }
}
