use super::state::{ScenarioStatus, StepStatus, Summary, serialize_millis};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// 엔진에서 리포터로 전달되는 라이프사이클 이벤트 모델이다.
///
/// 시나리오 단위로는 논리적 발생 순서가 보장된다. 서로 다른 시나리오의
/// 이벤트는 동시 실행에 따라 섞일 수 있다.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 전체 실행 시작.
    RunStart { scenario_count: usize },
    /// 시나리오 시작.
    ScenarioStart { name: String, tags: Vec<String> },
    /// Step 시작.
    StepStart {
        scenario: String,
        step_name: String,
        index: usize,
    },
    /// 실패한 시도 이후 재시도 예정.
    StepRetry {
        scenario: String,
        step_name: String,
        /// 방금 실패한 시도 번호.
        attempt: u32,
        #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
        delay: Duration,
        error: String,
    },
    /// Step 종료. 시작하지 않은 Step은 attempts가 0인 종료 이벤트만 받는다.
    StepEnd {
        scenario: String,
        step_name: String,
        status: StepStatus,
        attempts: u32,
        #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
        duration: Duration,
        error: Option<String>,
    },
    /// 시나리오 종료.
    ScenarioEnd {
        name: String,
        status: ScenarioStatus,
        #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
        duration: Duration,
        error: Option<String>,
    },
    /// 전체 실행 종료.
    RunEnd { summary: Summary },
}

/// 이벤트 채널 송신자를 감싼다. 수신 측이 없으면 이벤트를 버린다.
///
/// 무제한 채널을 사용하므로 느린 리포터가 엔진을 막지 않는다.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sender: Option<UnboundedSender<EngineEvent>>,
}

impl EventEmitter {
    pub fn new(sender: UnboundedSender<EngineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// 이벤트를 버리는 송신자.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_end_serializes_with_millis() {
        let event = EngineEvent::StepEnd {
            scenario: "s".into(),
            step_name: "login".into(),
            status: StepStatus::Failed,
            attempts: 3,
            duration: Duration::from_millis(1500),
            error: Some("boom".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_end");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["attempts"], 3);
    }

    #[tokio::test]
    async fn emitter_forwards_and_ignores_closed_channel() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = EventEmitter::new(tx);
        emitter.emit(EngineEvent::RunStart { scenario_count: 2 });
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::RunStart { scenario_count: 2 })
        ));
        drop(rx);
        emitter.emit(EngineEvent::RunStart { scenario_count: 0 });
        EventEmitter::disabled().emit(EngineEvent::RunStart { scenario_count: 0 });
    }
}
