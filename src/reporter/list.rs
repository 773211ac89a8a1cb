use super::{Reporter, format_millis};
use crate::engine::{EngineEvent, ScenarioStatus, StepStatus};
use std::io::Write;

/// 시나리오와 Step 결과를 사람이 읽기 쉬운 목록으로 출력한다.
pub struct ListReporter<W: Write> {
    out: W,
}

impl<W: Write> ListReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

fn step_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "ok",
        StepStatus::Failed => "FAIL",
        StepStatus::Skipped => "skip",
        StepStatus::Cancelled => "cancel",
    }
}

fn scenario_marker(status: ScenarioStatus) -> &'static str {
    match status {
        ScenarioStatus::Passed => "PASS",
        ScenarioStatus::Failed => "FAIL",
        ScenarioStatus::Skipped => "SKIP",
        ScenarioStatus::Cancelled => "CANCEL",
    }
}

impl<W: Write + Send> Reporter for ListReporter<W> {
    fn on_event(&mut self, event: &EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::RunStart { scenario_count } => {
                writeln!(self.out, "running {scenario_count} scenario(s)")?;
            }
            EngineEvent::ScenarioStart { name, tags } => {
                if tags.is_empty() {
                    writeln!(self.out, "{name}")?;
                } else {
                    writeln!(self.out, "{name} [{}]", tags.join(", "))?;
                }
            }
            EngineEvent::StepStart { .. } => {}
            EngineEvent::StepRetry {
                step_name,
                attempt,
                delay,
                error,
                ..
            } => {
                writeln!(
                    self.out,
                    "  retry {step_name} after attempt {attempt} in {}: {error}",
                    format_millis(*delay)
                )?;
            }
            EngineEvent::StepEnd {
                step_name,
                status,
                attempts,
                duration,
                error,
                ..
            } => {
                write!(
                    self.out,
                    "  {:<6} {step_name} ({})",
                    step_marker(*status),
                    format_millis(*duration)
                )?;
                if *attempts > 1 {
                    write!(self.out, " after {attempts} attempts")?;
                }
                match error {
                    Some(message) => writeln!(self.out, ": {message}")?,
                    None => writeln!(self.out)?,
                }
            }
            EngineEvent::ScenarioEnd {
                name,
                status,
                duration,
                error,
            } => {
                write!(
                    self.out,
                    "{} {name} ({})",
                    scenario_marker(*status),
                    format_millis(*duration)
                )?;
                match error {
                    Some(message) => writeln!(self.out, ": {message}")?,
                    None => writeln!(self.out)?,
                }
            }
            EngineEvent::RunEnd { summary } => {
                writeln!(
                    self.out,
                    "\n{} total, {} passed, {} failed, {} skipped ({} cancelled) in {}",
                    summary.total,
                    summary.passed,
                    summary.failed,
                    summary.skipped,
                    summary.cancelled,
                    format_millis(summary.duration)
                )?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
