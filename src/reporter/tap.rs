use super::Reporter;
use crate::engine::{EngineEvent, ScenarioStatus};
use std::io::Write;

/// 시나리오 하나를 TAP 테스트 포인트 하나로 출력한다.
pub struct TapReporter<W: Write> {
    out: W,
    /// 다음 테스트 포인트 번호.
    next: usize,
}

impl<W: Write> TapReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, next: 1 }
    }
}

/// YAML 진단 블록에 넣기 위해 줄바꿈과 따옴표를 이스케이프한다.
fn yaml_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl<W: Write + Send> Reporter for TapReporter<W> {
    fn on_event(&mut self, event: &EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::RunStart { scenario_count } => {
                writeln!(self.out, "TAP version 13")?;
                writeln!(self.out, "1..{scenario_count}")?;
            }
            EngineEvent::ScenarioEnd {
                name, status, error, ..
            } => {
                let number = self.next;
                self.next += 1;
                match status {
                    ScenarioStatus::Passed => writeln!(self.out, "ok {number} - {name}")?,
                    ScenarioStatus::Failed => {
                        writeln!(self.out, "not ok {number} - {name}")?;
                        if let Some(message) = error {
                            writeln!(self.out, "  ---")?;
                            writeln!(self.out, "  message: \"{}\"", yaml_escape(message))?;
                            writeln!(self.out, "  ...")?;
                        }
                    }
                    ScenarioStatus::Skipped | ScenarioStatus::Cancelled => {
                        let reason = error.as_deref().unwrap_or("skipped");
                        writeln!(self.out, "ok {number} - {name} # SKIP {reason}")?;
                    }
                }
            }
            EngineEvent::RunEnd { summary } => {
                writeln!(
                    self.out,
                    "# passed {} failed {} skipped {}",
                    summary.passed, summary.failed, summary.skipped
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
    use crate::reporter::test_support::SharedBuffer;
    use std::time::Duration;

    fn end(name: &str, status: ScenarioStatus, error: Option<&str>) -> EngineEvent {
        EngineEvent::ScenarioEnd {
            name: name.into(),
            status,
            duration: Duration::ZERO,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn numbers_test_points_in_completion_order() {
        let buffer = SharedBuffer::default();
        let mut reporter = TapReporter::new(buffer.clone());
        reporter
            .on_event(&EngineEvent::RunStart { scenario_count: 3 })
            .unwrap();
        reporter.on_event(&end("a", ScenarioStatus::Passed, None)).unwrap();
        reporter
            .on_event(&end("b", ScenarioStatus::Failed, Some("line1\n\"quoted\"")))
            .unwrap();
        reporter
            .on_event(&end("c", ScenarioStatus::Skipped, Some("not on ci")))
            .unwrap();

        let text = buffer.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "TAP version 13");
        assert_eq!(lines[1], "1..3");
        assert_eq!(lines[2], "ok 1 - a");
        assert_eq!(lines[3], "not ok 2 - b");
        assert_eq!(lines[5], "  message: \"line1\\n\\\"quoted\\\"\"");
        assert_eq!(lines[7], "ok 3 - c # SKIP not on ci");
    }
}
