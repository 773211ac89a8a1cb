use crate::action::StepValue;
use crate::error::{EngineError, StepError};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Step의 최종 상태를 표현한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// 정상 종료.
    Passed,
    /// 재시도를 모두 소진하고 실패.
    Failed,
    /// 실행하지 않았거나 SkipSignal로 생략.
    Skipped,
    /// 전역 취소로 중단.
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// 시나리오의 최종 상태를 표현한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Skipped => "skipped",
            ScenarioStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// 시나리오 실행 상태 머신의 단계이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Pending,
    Setup,
    Running,
    Teardown,
    Finished(ScenarioStatus),
}

impl ScenarioPhase {
    /// 종료 상태인지 확인한다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScenarioPhase::Finished(_))
    }

    /// `next`로의 전이가 허용되는지 확인한다.
    ///
    /// Pending은 생략 또는 취소로 바로 종료될 수 있고, Setup 실패 시에는
    /// Running을 거치지 않고 Teardown으로 간다.
    pub fn can_advance_to(&self, next: ScenarioPhase) -> bool {
        use ScenarioPhase::*;
        matches!(
            (self, next),
            (Pending, Setup)
                | (Pending, Finished(ScenarioStatus::Skipped))
                | (Pending, Finished(ScenarioStatus::Cancelled))
                | (Setup, Running)
                | (Setup, Teardown)
                | (Running, Teardown)
                | (Teardown, Finished(_))
        )
    }
}

/// 상태 전이를 기록하는 단순 상태 머신이다.
#[derive(Debug)]
pub struct ScenarioMachine {
    phase: ScenarioPhase,
}

impl ScenarioMachine {
    pub fn new() -> Self {
        Self {
            phase: ScenarioPhase::Pending,
        }
    }

    pub fn phase(&self) -> ScenarioPhase {
        self.phase
    }

    /// 다음 단계로 전이한다. 허용되지 않는 전이는 무시하고 false를 반환한다.
    pub fn advance(&mut self, next: ScenarioPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::error!(from = ?self.phase, to = ?next, "허용되지 않는 상태 전이");
            return false;
        }
        self.phase = next;
        true
    }
}

impl ScenarioMachine {
    /// 엔진 내부 전이용이다. 허용되지 않는 전이는 디버그 빌드에서 panic한다.
    #[track_caller]
    pub fn transition(&mut self, next: ScenarioPhase) {
        let from = self.phase;
        let advanced = self.advance(next);
        debug_assert!(advanced, "허용되지 않는 상태 전이: {from:?} -> {next:?}");
    }
}

impl Default for ScenarioMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Step 하나의 실행 결과이다.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step 이름.
    pub name: String,
    /// 시나리오 내 인덱스.
    pub index: usize,
    /// 최종 상태.
    pub status: StepStatus,
    /// 실제 수행한 시도 횟수. 시작하지 않은 Step은 0이다.
    pub attempts: u32,
    /// 모든 시도와 대기 시간을 포함한 소요 시간.
    pub duration: Duration,
    /// 통과 시 반환 값.
    pub value: Option<StepValue>,
    /// 실패 또는 취소 시 오류.
    pub error: Option<StepError>,
    /// 생략 사유.
    pub skip_reason: Option<String>,
}

impl StepResult {
    /// 시작하지 않은 Step의 결과를 만든다.
    pub(crate) fn not_started(
        name: &str,
        index: usize,
        status: StepStatus,
        reason: Option<String>,
    ) -> Self {
        let error = match status {
            StepStatus::Cancelled => Some(StepError::Cancelled {
                step: name.to_string(),
            }),
            _ => None,
        };
        Self {
            name: name.to_string(),
            index,
            status,
            attempts: 0,
            duration: Duration::ZERO,
            value: None,
            error,
            skip_reason: reason,
        }
    }

    /// 보고용 메시지. 오류가 있으면 오류, 없으면 생략 사유이다.
    pub fn message(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| self.skip_reason.clone())
    }
}

/// 시나리오 하나의 실행 결과이다.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub tags: Vec<String>,
    pub status: ScenarioStatus,
    /// 정의 순서대로 정렬된 Step 결과.
    pub steps: Vec<StepResult>,
    pub duration: Duration,
    /// 시나리오를 종료시킨 오류 또는 생략 사유.
    pub error: Option<EngineError>,
    /// teardown 단계에서 수집된 오류. 상태와 별도로 보관한다.
    pub teardown_errors: Vec<EngineError>,
}

impl ScenarioResult {
    pub fn is_passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ScenarioStatus::Failed
    }

    /// 특정 상태의 Step 수를 센다.
    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// 전체 실행 요약이다.
///
/// 취소된 시나리오는 `skipped`에 포함되며 `cancelled`는 그 중 취소 건수이다.
/// 따라서 항상 `total == passed + failed + skipped`이다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl Summary {
    /// 결과 목록을 집계한다.
    pub fn from_results(results: &[ScenarioResult], duration: Duration) -> Self {
        let mut summary = Summary {
            duration,
            ..Summary::default()
        };
        for result in results {
            summary.record(result.status);
        }
        summary
    }

    /// 시나리오 하나의 상태를 반영한다.
    pub fn record(&mut self, status: ScenarioStatus) {
        self.total += 1;
        match status {
            ScenarioStatus::Passed => self.passed += 1,
            ScenarioStatus::Failed => self.failed += 1,
            ScenarioStatus::Skipped => self.skipped += 1,
            ScenarioStatus::Cancelled => {
                self.skipped += 1;
                self.cancelled += 1;
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Duration을 밀리초 정수로 직렬화한다.
pub(crate) fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
