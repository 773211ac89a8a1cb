use super::{Reporter, format_millis};
use crate::engine::{EngineEvent, ScenarioStatus};
use std::io::Write;

/// 시나리오마다 문자 하나를 찍고 마지막에 실패 목록을 출력한다.
pub struct DotReporter<W: Write> {
    out: W,
    failures: Vec<(String, Option<String>)>,
}

impl<W: Write> DotReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            failures: Vec::new(),
        }
    }
}

impl<W: Write + Send> Reporter for DotReporter<W> {
    fn on_event(&mut self, event: &EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::ScenarioEnd {
                name,
                status,
                error,
                ..
            } => {
                let mark = match status {
                    ScenarioStatus::Passed => '.',
                    ScenarioStatus::Failed => {
                        self.failures.push((name.clone(), error.clone()));
                        'F'
                    }
                    ScenarioStatus::Skipped => 'S',
                    ScenarioStatus::Cancelled => 'C',
                };
                write!(self.out, "{mark}")?;
                self.out.flush()?;
            }
            EngineEvent::RunEnd { summary } => {
                writeln!(self.out)?;
                for (name, error) in &self.failures {
                    writeln!(self.out, "failed: {name}: {}", error.as_deref().unwrap_or("-"))?;
                }
                writeln!(
                    self.out,
                    "{} passed, {} failed, {} skipped in {}",
                    summary.passed,
                    summary.failed,
                    summary.skipped,
                    format_millis(summary.duration)
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Summary;
    use crate::reporter::test_support::SharedBuffer;
    use std::time::Duration;

    #[test]
    fn marks_and_failure_list() {
        let buffer = SharedBuffer::default();
        let mut reporter = DotReporter::new(buffer.clone());
        for (name, status) in [
            ("a", ScenarioStatus::Passed),
            ("b", ScenarioStatus::Failed),
            ("c", ScenarioStatus::Cancelled),
        ] {
            reporter
                .on_event(&EngineEvent::ScenarioEnd {
                    name: name.into(),
                    status,
                    duration: Duration::ZERO,
                    error: (status == ScenarioStatus::Failed).then(|| "boom".to_string()),
                })
                .unwrap();
        }
        reporter
            .on_event(&EngineEvent::RunEnd {
                summary: Summary::default(),
            })
            .unwrap();

        let text = buffer.text();
        assert!(text.starts_with(".FC\n"));
        assert!(text.contains("failed: b: boom"));
    }
}
