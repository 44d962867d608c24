//! Output formatting for CLI commands.
//!
//! Plans, execution reports and check results render as tables or JSON.
//! Secret values never appear: attributes from `.env.secrets` are masked
//! and free text (driver errors, reasons) is scrubbed of any secret value.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ConfigStore, MASK, MIN_SECRET_LEN, Namespace};
use crate::planner::{ActionKind, DiffView, Outcome, Plan, Report};
use crate::preflight::{CheckReport, Severity};
use crate::scaffold::InitReport;
use crate::sections::{SectionName, SkippedSection};

use super::commands::OutputFormat;

/// How much to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Detail {
    /// One line per section.
    #[default]
    Summary,
    /// Field diffs, every check and the resolved configuration.
    Full,
}

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
    /// Level of detail.
    detail: Detail,
    /// Secret values to scrub, longest first.
    secrets: Vec<String>,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Section")]
    section: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Report row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Section")]
    section: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Check row for table display.
#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Status")]
    severity: String,
    #[tabled(rename = "Area")]
    group: String,
    #[tabled(rename = "Check")]
    message: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat, detail: Detail) -> Self {
        Self {
            format,
            detail,
            secrets: Vec::new(),
        }
    }

    /// Scrubs the secret values of `config` from every rendered message.
    #[must_use]
    pub fn with_secrets(mut self, config: &ConfigStore) -> Self {
        self.secrets = config
            .secret_values()
            .into_iter()
            .filter(|value| value.chars().count() >= MIN_SECRET_LEN)
            .map(ToString::to_string)
            .collect();
        self.secrets.sort_by_key(|value| std::cmp::Reverse(value.len()));
        self.secrets.dedup();
        self
    }

    /// Replaces every known secret value in `text` with the mask.
    #[must_use]
    pub fn scrub(&self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for secret in &self.secrets {
            if scrubbed.contains(secret.as_str()) {
                scrubbed = scrubbed.replace(secret.as_str(), MASK);
            }
        }
        scrubbed
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, config: &ConfigStore) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = PlanJson::new(self, plan, config);
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => self.format_plan_text(plan, config),
        }
    }

    fn format_plan_text(&self, plan: &Plan, config: &ConfigStore) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\n📋 Deployment Plan");
        let _ = writeln!(
            output,
            "   Fingerprint: {}\n",
            ConfigHasher::short_hash(&plan.fingerprint)
        );

        if plan.is_empty() {
            let _ = writeln!(output, "   No sections selected.");
        } else {
            let rows: Vec<PlanActionRow> = plan
                .actions
                .iter()
                .enumerate()
                .map(|(i, action)| PlanActionRow {
                    index: i + 1,
                    section: action.section.to_string(),
                    action: Self::format_kind(action.kind),
                    resource: action.resource().to_string(),
                    details: match (&action.reason, action.diff.len()) {
                        (Some(reason), _) => Self::truncate(&self.scrub(reason), 60),
                        (None, 0) => String::new(),
                        (None, n) => format!("{n} change(s)"),
                    },
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if self.detail == Detail::Full {
            for action in plan.actions.iter().filter(|action| !action.diff.is_empty()) {
                let _ = writeln!(output, "\n{} {}", "~".yellow(), action.section);
                for change in &action.diff {
                    let view = DiffView::from(change);
                    let _ = writeln!(
                        output,
                        "   {}: {} -> {}",
                        view.field,
                        view.old.as_deref().map_or_else(|| "(none)".dimmed().to_string(), |old| self.scrub(old)),
                        view.new.as_deref().map_or_else(String::new, |new| self.scrub(new)),
                    );
                }
            }
        }

        Self::write_skipped(&mut output, &plan.skipped);
        if !plan.implied.is_empty() {
            let _ = writeln!(
                output,
                "\nAdded as dependencies: {}",
                Self::join_sections(&plan.implied)
            );
        }

        let count = |kind: ActionKind| plan.actions.iter().filter(|action| action.kind == kind).count();
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged, {} not managed",
            count(ActionKind::Create).to_string().green(),
            count(ActionKind::Update).to_string().yellow(),
            count(ActionKind::NoChange),
            count(ActionKind::Skip),
        );
        if plan.has_inspection_failures() {
            let _ = writeln!(
                output,
                "{} {} section(s) could not be inspected and will fail",
                "⚠".yellow(),
                count(ActionKind::InspectionFailed)
            );
        }

        if self.detail == Detail::Full {
            output.push_str(&Self::format_config_text(config));
        }
        output
    }

    fn format_config_text(config: &ConfigStore) -> String {
        let mut output = String::from("\nConfiguration:\n");
        for namespace in Namespace::FILES.into_iter().chain([Namespace::Environment]) {
            let mut entries = config.namespace(namespace).peekable();
            if entries.peek().is_none() {
                continue;
            }
            let _ = writeln!(output, "  [{namespace}]");
            for (key, value) in entries {
                let _ = writeln!(output, "   {key}={}", value.display_value());
            }
        }
        output
    }

    /// Formats an execution report.
    #[must_use]
    pub fn format_report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::new(self, report)).unwrap_or_default()
            }
            OutputFormat::Text => self.format_report_text(report),
        }
    }

    fn format_report_text(&self, report: &Report) -> String {
        let mut output = String::new();
        let status = if report.was_cancelled() {
            format!("{} Deployment cancelled", "✗".red())
        } else if !report.success {
            format!("{} Deployment finished with failures", "✗".red())
        } else if report.dry_run {
            format!("{} Dry run complete, nothing was changed", "✓".green())
        } else {
            format!("{} Deployment successful", "✓".green())
        };
        let _ = writeln!(output, "\n{status}");
        let _ = writeln!(output, "   Run: {}\n", report.run_id);

        if !report.results.is_empty() {
            let rows: Vec<ResultRow> = report
                .results
                .iter()
                .map(|result| ResultRow {
                    section: result.section.to_string(),
                    status: Self::format_outcome(&result.outcome),
                    duration: format!("{:.1}s", result.duration.as_secs_f64()),
                    details: result
                        .outcome
                        .detail()
                        .map(|detail| Self::truncate(&self.scrub(&detail), 70))
                        .unwrap_or_default(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\nApplied: {}, unchanged: {}, skipped: {}, failed: {}",
            report.count("applied"),
            report.count("no change"),
            report.count("skipped"),
            report.count("failed"),
        );

        let urls: Vec<_> = report
            .results
            .iter()
            .filter_map(|result| result.outputs.get("url").map(|url| (result.section, url)))
            .collect();
        if !urls.is_empty() {
            output.push_str("\nEndpoints:\n");
            for (section, url) in urls {
                let _ = writeln!(output, "   {section} -> {url}");
            }
        }
        output
    }

    /// Formats preflight results. Summary mode lists only issues.
    #[must_use]
    pub fn format_check(&self, report: &CheckReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&CheckJson::new(self, report)).unwrap_or_default()
            }
            OutputFormat::Text => self.format_check_text(report),
        }
    }

    fn format_check_text(&self, report: &CheckReport) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "\n🔎 Preflight: project {}, region {}",
            report.project.as_deref().unwrap_or("(unset)"),
            report.region.as_deref().unwrap_or("(unset)")
        );
        let toggles: Vec<String> = report
            .toggles
            .iter()
            .map(|(section, enabled)| {
                if *enabled {
                    section.to_string().green().to_string()
                } else {
                    section.to_string().dimmed().to_string()
                }
            })
            .collect();
        let _ = writeln!(output, "   Sections: {}\n", toggles.join(" "));

        let rows: Vec<CheckRow> = report
            .items
            .iter()
            .filter(|item| self.detail == Detail::Full || item.severity != Severity::Ok)
            .map(|item| CheckRow {
                severity: Self::format_severity(item.severity),
                group: item.group.to_string(),
                message: self.scrub(&item.message),
            })
            .collect();
        if rows.is_empty() {
            let _ = writeln!(output, "{} No issues found.", "✓".green());
        } else {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let critical = report.with_severity(Severity::Critical).count();
        let warnings = report.with_severity(Severity::Warning).count();
        let _ = writeln!(
            output,
            "\n{} critical, {} warning(s)",
            if critical > 0 { critical.to_string().red() } else { critical.to_string().green() },
            warnings.to_string().yellow()
        );
        output
    }

    /// Formats the result of `init`.
    #[must_use]
    pub fn format_init(&self, report: &InitReport) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "created": report.created,
                    "skipped": report.skipped,
                    "gitignore_added": report.ignored,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for path in &report.created {
                    let _ = writeln!(output, "{} Created: {}", "✓".green(), path.display());
                }
                for path in &report.skipped {
                    let _ = writeln!(output, "  Exists, skipped: {} (use --force to overwrite)", path.display());
                }
                if !report.ignored.is_empty() {
                    let _ = writeln!(output, "{} .gitignore now ignores: {}", "✓".green(), report.ignored.join(", "));
                }
                output.push_str("\nNext steps:\n");
                output.push_str("  1. Copy each env.*.example to .env.* and fill in your values\n");
                output.push_str("  2. Run 'deploy-gcp check' to verify tools, credentials and configuration\n");
                output.push_str("  3. Run 'deploy-gcp plan' to see what will change\n");
                output.push_str("  4. Run 'deploy-gcp deploy' to apply it\n");
                output
            }
        }
    }

    /// Formats a fatal error.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        let message = self.scrub(message);
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    fn write_skipped(output: &mut String, skipped: &[SkippedSection]) {
        if skipped.is_empty() {
            return;
        }
        output.push_str("\nDisabled:\n");
        for entry in skipped {
            let _ = writeln!(output, "   {} ({})", entry.section, entry.reason);
        }
    }

    fn join_sections(sections: &[SectionName]) -> String {
        sections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Formats an action kind with color.
    fn format_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::NoChange => "no change".dimmed().to_string(),
            ActionKind::Skip => "skip".dimmed().to_string(),
            ActionKind::InspectionFailed => "!inspect".red().to_string(),
        }
    }

    fn format_outcome(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Applied => "applied".green().to_string(),
            Outcome::NoChangeNeeded => "no change".dimmed().to_string(),
            Outcome::Skipped(_) => "skipped".yellow().to_string(),
            Outcome::Failed(_) => "failed".red().to_string(),
        }
    }

    fn format_severity(severity: Severity) -> String {
        match severity {
            Severity::Ok => "ok".green().to_string(),
            Severity::Warning => "warning".yellow().to_string(),
            Severity::Critical => "critical".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    fingerprint: String,
    changes: usize,
    actions: Vec<ActionJson>,
    skipped: Vec<SkippedSection>,
    implied: Vec<SectionName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<BTreeMap<Namespace, BTreeMap<String, String>>>,
}

#[derive(Serialize)]
struct ActionJson {
    section: SectionName,
    kind: ActionKind,
    resource: String,
    depends_on: Vec<SectionName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    change_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<Vec<DiffView>>,
}

impl PlanJson {
    fn new(formatter: &OutputFormatter, plan: &Plan, config: &ConfigStore) -> Self {
        let full = formatter.detail == Detail::Full;
        Self {
            fingerprint: plan.fingerprint.clone(),
            changes: plan.change_count(),
            actions: plan
                .actions
                .iter()
                .map(|action| ActionJson {
                    section: action.section,
                    kind: action.kind,
                    resource: action.resource().to_string(),
                    depends_on: action.depends_on.clone(),
                    reason: action.reason.as_deref().map(|reason| formatter.scrub(reason)),
                    change_count: action.diff.len(),
                    diff: full.then(|| action.diff.iter().map(DiffView::from).collect()),
                })
                .collect(),
            skipped: plan.skipped.clone(),
            implied: plan.implied.clone(),
            config: full.then(|| {
                let mut grouped: BTreeMap<Namespace, BTreeMap<String, String>> = BTreeMap::new();
                for (key, value) in config.iter() {
                    grouped
                        .entry(value.namespace)
                        .or_default()
                        .insert(key.to_string(), value.display_value().to_string());
                }
                grouped
            }),
        }
    }
}

#[derive(Serialize)]
struct ReportJson {
    run_id: String,
    started_at: String,
    finished_at: String,
    dry_run: bool,
    success: bool,
    cancelled: bool,
    results: Vec<ResultJson>,
}

#[derive(Serialize)]
struct ResultJson {
    section: SectionName,
    kind: ActionKind,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    duration_ms: u64,
    attempts: usize,
    outputs: BTreeMap<String, String>,
}

impl ReportJson {
    fn new(formatter: &OutputFormatter, report: &Report) -> Self {
        Self {
            run_id: report.run_id.to_string(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            dry_run: report.dry_run,
            success: report.success,
            cancelled: report.was_cancelled(),
            results: report
                .results
                .iter()
                .map(|result| ResultJson {
                    section: result.section,
                    kind: result.kind,
                    status: result.outcome.label(),
                    detail: result.outcome.detail().map(|detail| formatter.scrub(&detail)),
                    duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                    attempts: result.attempts,
                    outputs: result
                        .outputs
                        .iter()
                        .map(|(key, value)| (key.clone(), formatter.scrub(value)))
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct CheckJson<'a> {
    project: Option<&'a str>,
    region: Option<&'a str>,
    critical: usize,
    warnings: usize,
    sections: BTreeMap<SectionName, bool>,
    items: Vec<CheckItemJson>,
}

#[derive(Serialize)]
struct CheckItemJson {
    group: String,
    severity: Severity,
    message: String,
}

impl<'a> CheckJson<'a> {
    fn new(formatter: &OutputFormatter, report: &'a CheckReport) -> Self {
        Self {
            project: report.project.as_deref(),
            region: report.region.as_deref(),
            critical: report.with_severity(Severity::Critical).count(),
            warnings: report.with_severity(Severity::Warning).count(),
            sections: report.toggles.iter().copied().collect(),
            items: report
                .items
                .iter()
                .filter(|item| formatter.detail == Detail::Full || item.severity != Severity::Ok)
                .map(|item| CheckItemJson {
                    group: item.group.to_string(),
                    severity: item.severity,
                    message: formatter.scrub(&item.message),
                })
                .collect(),
        }
    }
}
