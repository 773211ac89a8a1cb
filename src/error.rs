use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// 의도적으로 실행을 생략할 때 사용하는 신호이다. 실패로 집계되지 않는다.
///
/// Step 액션이나 setup 훅이 `Err(SkipSignal::new("...").into())`를 반환하면
/// 엔진은 이를 실패가 아닌 Skipped로 처리한다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("건너뜀: {reason}")]
pub struct SkipSignal {
    /// 생략 사유.
    pub reason: String,
}

impl SkipSignal {
    /// 사유 문자열로 신호를 생성한다.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// anyhow 오류가 SkipSignal을 담고 있다면 이를 꺼낸다.
    pub fn find(err: &anyhow::Error) -> Option<&SkipSignal> {
        err.downcast_ref::<SkipSignal>()
    }
}

/// 단일 Step 시도에서 발생한 오류이다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// 시도가 제한 시간을 초과했다.
    #[error("Step '{step}' 시간 초과 ({}ms)", timeout.as_millis())]
    Timeout { step: String, timeout: Duration },
    /// 액션이 오류를 반환했다.
    #[error("Step '{step}' 실행 실패: {message}")]
    Execution { step: String, message: String },
    /// 전역 취소 신호로 중단되었다.
    #[error("Step '{step}' 실행이 취소되었습니다.")]
    Cancelled { step: String },
}

impl StepError {
    /// 시간 초과 계열 오류인지 확인한다.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// 시나리오 및 러너 수준의 오류 분류이다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// 리소스 팩토리가 실패했다.
    #[error("리소스 '{name}' 획득 실패: {message}")]
    ResourceSetup { name: String, message: String },
    /// setup 훅이 실패했다.
    #[error("setup 훅 #{index} 실패: {message}")]
    SetupHook { index: usize, message: String },
    /// 리소스 정리 콜백이 실패했다.
    #[error("리소스 '{name}' 정리 실패: {message}")]
    ResourceTeardown { name: String, message: String },
    /// teardown 훅이 실패했다.
    #[error("teardown 훅 #{index} 실패: {message}")]
    TeardownHook { index: usize, message: String },
    /// Step이 재시도를 모두 소진하고 실패했다.
    #[error("{0}")]
    StepFailed(StepError),
    /// 의도적으로 실행하지 않았다.
    #[error("{0}")]
    Skipped(SkipSignal),
    /// 전역 취소 신호가 발생했다.
    #[error("시나리오 실행이 취소되었습니다.")]
    ScenarioCancelled,
    /// 실패 허용 한도에 도달해 시작하지 않았다.
    #[error("실패 허용 한도({limit})에 도달하여 실행하지 않았습니다.")]
    FailureThresholdReached { limit: usize },
    /// 시나리오 태스크가 비정상 종료했다.
    #[error("시나리오 태스크가 비정상 종료했습니다: {message}")]
    Panicked { message: String },
}

impl EngineError {
    /// teardown 단계에서 수집된 오류인지 확인한다.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            EngineError::ResourceTeardown { .. } | EngineError::TeardownHook { .. }
        )
    }
}

/// anyhow 오류를 원인 체인까지 포함한 한 줄 메시지로 변환한다.
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

/// 사용자 코드의 panic을 일반 오류로 바꾼다.
///
/// 액션, 훅, 팩토리, 정리 콜백이 panic해도 시나리오 태스크가 풀리지 않고
/// teardown까지 진행되도록 모든 호출 지점에서 감싼다.
pub(crate) async fn catch_panic<T, F>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panic: {}", panic_text(payload.as_ref()))),
    }
}

/// panic payload에서 메시지를 꺼낸다.
pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "알 수 없는 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_signal_survives_anyhow_round_trip() {
        let err: anyhow::Error = SkipSignal::new("환경 미지원").into();
        let found = SkipSignal::find(&err).map(|s| s.reason.clone());
        assert_eq!(found.as_deref(), Some("환경 미지원"));
    }

    #[test]
    fn plain_errors_are_not_skip_signals() {
        let err = anyhow::anyhow!("boom");
        assert!(SkipSignal::find(&err).is_none());
    }

    #[test]
    fn teardown_errors_are_classified() {
        let err = EngineError::TeardownHook {
            index: 0,
            message: "x".into(),
        };
        assert!(err.is_teardown());
        assert!(!EngineError::ScenarioCancelled.is_teardown());
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let result: anyhow::Result<()> = catch_panic(async {
            if true {
                panic!("pool exhausted");
            }
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "panic: pool exhausted");
    }

    #[tokio::test]
    async fn formatted_panic_keeps_message() {
        let id = 7;
        let result: anyhow::Result<u8> = catch_panic(async move {
            if id > 0 {
                panic!("worker {id} died");
            }
            Ok(1)
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "panic: worker 7 died");
    }

    #[test]
    fn describe_keeps_context_chain() {
        let err = anyhow::anyhow!("root").context("outer");
        assert_eq!(describe(&err), "outer: root");
    }
}
