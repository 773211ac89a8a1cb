//! 엔진 이벤트를 사람이 읽거나 도구가 소비할 수 있는 형태로 출력한다.

mod dot;
mod json;
mod list;
mod tap;

pub use dot::DotReporter;
pub use json::JsonReporter;
pub use list::ListReporter;
pub use tap::TapReporter;

use crate::engine::EngineEvent;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

/// Reporter는 이벤트 스트림을 소비하는 출력 계층이다.
///
/// 이벤트 처리는 동기적으로 짧게 끝나야 한다. 느린 I/O는 구현체가 버퍼링한다.
pub trait Reporter: Send {
    /// 이벤트 하나를 처리한다.
    fn on_event(&mut self, event: &EngineEvent) -> anyhow::Result<()>;

    /// 스트림이 끝난 뒤 남은 출력을 비운다.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 출력 형식이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// 시나리오와 Step을 한 줄씩 나열한다.
    #[default]
    List,
    /// Test Anything Protocol.
    Tap,
    /// 이벤트당 JSON 한 줄.
    Json,
    /// 시나리오당 문자 하나.
    Dot,
}

impl ReporterKind {
    /// 지정한 출력 대상으로 리포터를 생성한다.
    pub fn build<W: Write + Send + 'static>(self, out: W) -> Box<dyn Reporter> {
        match self {
            ReporterKind::List => Box::new(ListReporter::new(out)),
            ReporterKind::Tap => Box::new(TapReporter::new(out)),
            ReporterKind::Json => Box::new(JsonReporter::new(out)),
            ReporterKind::Dot => Box::new(DotReporter::new(out)),
        }
    }
}

/// 채널이 닫힐 때까지 이벤트를 모든 리포터에 전달한다.
///
/// 한 리포터의 출력 오류는 기록만 하고 다른 리포터와 엔진에는 영향을 주지 않는다.
pub async fn drive_reporters(
    mut rx: UnboundedReceiver<EngineEvent>,
    mut reporters: Vec<Box<dyn Reporter>>,
) {
    while let Some(event) = rx.recv().await {
        for reporter in reporters.iter_mut() {
            if let Err(err) = reporter.on_event(&event) {
                warn!(error = %err, "리포터 출력 실패");
            }
        }
    }
    for reporter in reporters.iter_mut() {
        if let Err(err) = reporter.finish() {
            warn!(error = %err, "리포터 종료 처리 실패");
        }
    }
}

/// 밀리초 단위 표시 문자열.
pub(crate) fn format_millis(duration: std::time::Duration) -> String {
    format!("{}ms", duration.as_millis())
}
