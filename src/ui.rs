//! Salida de terminal de escalafon: texto con colores o JSON.
//!
//! Usa la crate `console` para estilizar. Cada `render_*` devuelve el texto
//! para poder probarlo; [`Ui::emit`] decide entre JSON y texto.

use console::Style;
use serde::Serialize;

use crate::eligibility::{DimensionOutcome, EligibilityReport};
use crate::ladder::RankRequirementConfig;
use crate::ledger::{DrainReport, QueuedWrite};
use crate::state_machine::{PromotionRequest, RequestStatus};
use crate::workflow::{FinalizeOutcome, RankRetryReport};

/// Renders command results for the terminal.
pub struct Ui {
    json: bool,
    // Success.
    green: Style,
    // Failures and rejections.
    red: Style,
    // Pending, deferred, skipped.
    yellow: Style,
    bold: Style,
    dim: Style,
}

impl Ui {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            bold: Style::new().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Prints `value` as pretty JSON in `--json` mode, otherwise `text`.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&Self) -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(self));
        }
        Ok(())
    }

    pub fn render_requirements(&self, config: &RankRequirementConfig) -> String {
        let mut out = vec![self.header(&format!("{} → {}", config.current_rank, config.target_rank))];
        out.push(format!("  Years in rank          {}", config.years_of_service));
        out.push(format!(
            "  Relevant works         {} ({} UTA-affiliated)",
            config.min_publications_total, config.min_publications_uta
        ));
        out.push(format!(
            "  Evaluation             ≥ {:.0}% over the last {} periods",
            config.evaluation_percentage_min, config.evaluation_periods
        ));
        out.push(format!(
            "  Training               {:.0} h ({:.0} h pedagogical)",
            config.training_hours, config.pedagogical_training_hours
        ));
        if config.requires_research_projects {
            out.push(format!("  Research projects      {} months", config.research_project_months));
        } else {
            out.push(format!("  Research projects      {}", self.dim.apply_to("not required")));
        }
        out.join("\n")
    }

    pub fn render_report(&self, report: &EligibilityReport) -> String {
        let verdict = if report.overall_pass {
            self.green.apply_to("ELIGIBLE").to_string()
        } else {
            self.red.apply_to("NOT ELIGIBLE").to_string()
        };
        let mut out = vec![self.header(&format!(
            "{} · {} → {} · {verdict}",
            report.faculty_id, report.requirements.current_rank, report.requirements.target_rank
        ))];
        if report.fallback_thresholds {
            out.push(format!(
                "  {} {:?} is not on the ladder; lowest-tier thresholds used",
                self.yellow.apply_to("!"),
                report.rank_input
            ));
        }
        for dimension in &report.dimensions {
            let mark = match dimension.outcome {
                DimensionOutcome::Passed => self.green.apply_to("✓"),
                DimensionOutcome::Failed => self.red.apply_to("✗"),
                DimensionOutcome::InsufficientData => self.red.apply_to("?"),
                DimensionOutcome::Skipped => self.dim.apply_to("-"),
            };
            out.push(format!("  {mark} {:<24} {}", dimension.dimension.to_string(), dimension.message));
        }
        out.push(self.dim.apply_to(format!("  evaluated on {}", report.evaluated_on)).to_string());
        out.join("\n")
    }

    pub fn render_request(&self, request: &PromotionRequest) -> String {
        let status = match request.status {
            RequestStatus::Finalizado => self.green.apply_to(request.status.to_string()),
            s if s.is_rejected() => self.red.apply_to(request.status.to_string()),
            _ => self.yellow.apply_to(request.status.to_string()),
        };
        let mut out = vec![format!(
            "{} {status} {} → {} (stage {})",
            self.bold.apply_to(&request.id),
            request.rank_from,
            request.rank_to,
            request.review_stage
        )];
        out.push(format!("    submitted {}", request.submitted_at.format("%Y-%m-%d %H:%M")));
        if let Some(reason) = &request.decision_reason {
            out.push(format!("    reason: {reason}"));
        }
        if let Some(original) = &request.supersedes {
            out.push(format!("    appeal of {original}"));
        }
        if request.rank_update_pending {
            out.push(format!("    {} rank update to {} pending", self.yellow.apply_to("↻"), request.rank_to));
        }
        for note in &request.observations {
            out.push(self.dim.apply_to(format!("    · {note}")).to_string());
        }
        out.join("\n")
    }

    pub fn render_requests(&self, faculty_id: &str, requests: &[PromotionRequest]) -> String {
        if requests.is_empty() {
            return format!("No promotion requests for {faculty_id}");
        }
        let mut out = vec![self.header(&format!("Requests for {faculty_id}"))];
        out.extend(requests.iter().map(|r| self.render_request(r)));
        out.join("\n")
    }

    pub fn render_finalize(&self, outcome: &FinalizeOutcome) -> String {
        let mut out = Vec::new();
        if outcome.already_finalized {
            out.push(format!(
                "  {} Request {} was already finalized",
                self.yellow.apply_to("="),
                outcome.request.id
            ));
        } else {
            out.push(format!(
                "  {} {} promoted to {}",
                self.green.apply_to("✓"),
                outcome.request.faculty_id,
                outcome.request.rank_to
            ));
        }
        for record in &outcome.consumed {
            out.push(format!("    consumed {}", record.key()));
        }
        for record in &outcome.deferred {
            out.push(format!("    {} {} queued for retry", self.yellow.apply_to("↻"), record.key()));
        }
        for failure in &outcome.best_effort_failures {
            out.push(format!("    {} {failure}", self.red.apply_to("!")));
        }
        out.join("\n")
    }

    pub fn render_drain(&self, report: &DrainReport, dead_letters: &[QueuedWrite], ranks: &RankRetryReport) -> String {
        let mut out = vec![format!(
            "  {} written, {} still pending, {} dead-lettered",
            self.green.apply_to(report.written),
            self.yellow.apply_to(report.still_pending),
            self.red.apply_to(report.dead_lettered)
        )];
        if !ranks.applied.is_empty() || !ranks.still_pending.is_empty() {
            out.push(format!(
                "  {} rank updates applied, {} still pending",
                self.green.apply_to(ranks.applied.len()),
                self.yellow.apply_to(ranks.still_pending.len())
            ));
        }
        for write in dead_letters {
            out.push(format!(
                "    {} {} after {} attempts: {}",
                self.red.apply_to("✗"),
                write.record.key(),
                write.attempts,
                write.last_error
            ));
        }
        out.join("\n")
    }

    /// Error line for the top-level handler.
    pub fn render_error(&self, class: &str, message: &str) -> String {
        format!("{} [{class}] {message}", self.red.apply_to("✗"))
    }

    fn header(&self, title: &str) -> String {
        self.bold.apply_to(format!("─── {title} ───")).to_string()
    }
}
