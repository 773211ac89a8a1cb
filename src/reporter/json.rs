use super::Reporter;
use crate::engine::EngineEvent;
use anyhow::Context;
use std::io::Write;

/// 이벤트마다 JSON 한 줄을 출력한다.
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Reporter for JsonReporter<W> {
    fn on_event(&mut self, event: &EngineEvent) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, event).context("이벤트 직렬화 실패")?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.out.flush().context("JSON 출력 flush 실패")
    }
}
