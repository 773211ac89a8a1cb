use super::context::{SharedExecutionContext, new_shared_context};
use super::events::{EngineEvent, EventEmitter};
use super::resources::ResourceManager;
use super::state::{
    ScenarioMachine, ScenarioPhase, ScenarioResult, ScenarioStatus, StepResult, StepStatus,
};
use super::step::StepExecutor;
use crate::error::{EngineError, SkipSignal, catch_panic, describe};
use crate::scenario::ScenarioDefinition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// teardown 오류가 통과한 시나리오의 상태에 주는 영향이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// 오류를 결과에 첨부만 하고 상태는 유지한다.
    #[default]
    Record,
    /// 오류가 있으면 Passed를 Failed로 바꾼다.
    FailScenario,
}

/// 시나리오 실행기 옵션이다.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub teardown_policy: TeardownPolicy,
    /// teardown 훅과 리소스 정리 콜백 각각에 허용되는 시간.
    pub teardown_timeout: Option<Duration>,
}

/// setup 단계의 결과이다.
enum SetupOutcome {
    Ready,
    Failed(EngineError),
    Skipped(SkipSignal),
    Cancelled,
}

/// Step 실행 단계의 결과 요약이다.
struct RunOutcome {
    steps: Vec<StepResult>,
    cancelled: bool,
    first_failure: Option<EngineError>,
    skip: Option<SkipSignal>,
}

/// Scenario 전체를 실행하고 이벤트를 송신한다.
///
/// 상태 머신은 Pending → Setup → Running → Teardown → 종료 상태 순으로 진행한다.
/// 생략 술어가 참이면 리소스와 Step 없이 바로 Skipped가 된다. 그 외에는 어떤
/// 경로로 끝나든 teardown이 정확히 한 번 실행된 뒤 결과가 보고된다. 액션,
/// 훅, 팩토리의 panic은 해당 호출의 실패로 처리된다.
///
/// # 인자
/// - `definition`: 실행할 불변 시나리오 정의
/// - `options`: teardown 정책과 정리 콜백당 허용 시간
/// - `emitter`: 라이프사이클 이벤트 송신자
/// - `cancel`: 전역 취소 토큰. setup, Step 시도, 재시도 대기 중에 확인한다
///
/// # 반환값
/// 최종 상태, Step 결과, 대표 오류, teardown 오류를 담은 `ScenarioResult`를 반환한다.
pub async fn run_scenario(
    definition: Arc<ScenarioDefinition>,
    options: ScenarioOptions,
    emitter: EventEmitter,
    cancel: CancellationToken,
) -> ScenarioResult {
    let started = Instant::now();
    let mut machine = ScenarioMachine::new();
    let name = definition.name.clone();
    emitter.emit(EngineEvent::ScenarioStart {
        name: name.clone(),
        tags: definition.tag_list(),
    });

    if let Some(reason) = definition.skip.as_ref().and_then(|predicate| predicate()) {
        info!(scenario = %name, reason = %reason, "시나리오 생략");
        machine.transition(ScenarioPhase::Finished(ScenarioStatus::Skipped));
        let steps = not_started_steps(&definition, 0, StepStatus::Skipped, Some(&reason), &emitter);
        return finish(
            &definition,
            &emitter,
            started,
            ScenarioStatus::Skipped,
            steps,
            Some(EngineError::Skipped(SkipSignal::new(reason))),
            Vec::new(),
        );
    }
    if cancel.is_cancelled() {
        machine.transition(ScenarioPhase::Finished(ScenarioStatus::Cancelled));
        let steps = not_started_steps(&definition, 0, StepStatus::Cancelled, None, &emitter);
        return finish(
            &definition,
            &emitter,
            started,
            ScenarioStatus::Cancelled,
            steps,
            Some(EngineError::ScenarioCancelled),
            Vec::new(),
        );
    }

    info!(scenario = %name, steps = definition.len(), "시나리오 시작");
    let ctx = new_shared_context();
    let mut resources = ResourceManager::new(options.teardown_timeout);

    machine.transition(ScenarioPhase::Setup);
    let setup = run_setup(&definition, &mut resources, &ctx, &cancel).await;

    let (mut status, steps, mut error) = match setup {
        SetupOutcome::Ready => {
            machine.transition(ScenarioPhase::Running);
            let outcome = run_steps(&definition, &ctx, &emitter, &cancel).await;
            if outcome.cancelled {
                (
                    ScenarioStatus::Cancelled,
                    outcome.steps,
                    Some(EngineError::ScenarioCancelled),
                )
            } else if let Some(err) = outcome.first_failure {
                (ScenarioStatus::Failed, outcome.steps, Some(err))
            } else if let Some(signal) = outcome.skip {
                (
                    ScenarioStatus::Skipped,
                    outcome.steps,
                    Some(EngineError::Skipped(signal)),
                )
            } else {
                (ScenarioStatus::Passed, outcome.steps, None)
            }
        }
        SetupOutcome::Failed(err) => {
            warn!(scenario = %name, error = %err, "setup 실패");
            let steps = not_started_steps(&definition, 0, StepStatus::Skipped, None, &emitter);
            (ScenarioStatus::Failed, steps, Some(err))
        }
        SetupOutcome::Skipped(signal) => {
            info!(scenario = %name, reason = %signal.reason, "setup에서 시나리오 생략");
            let steps = not_started_steps(
                &definition,
                0,
                StepStatus::Skipped,
                Some(&signal.reason),
                &emitter,
            );
            (ScenarioStatus::Skipped, steps, Some(EngineError::Skipped(signal)))
        }
        SetupOutcome::Cancelled => {
            let steps = not_started_steps(&definition, 0, StepStatus::Cancelled, None, &emitter);
            (
                ScenarioStatus::Cancelled,
                steps,
                Some(EngineError::ScenarioCancelled),
            )
        }
    };

    machine.transition(ScenarioPhase::Teardown);
    let teardown_errors = run_teardown(&definition, &mut resources, &ctx, &options).await;
    if status == ScenarioStatus::Passed
        && !teardown_errors.is_empty()
        && options.teardown_policy == TeardownPolicy::FailScenario
    {
        status = ScenarioStatus::Failed;
        error = teardown_errors.first().cloned();
    }
    machine.transition(ScenarioPhase::Finished(status));

    finish(
        &definition,
        &emitter,
        started,
        status,
        steps,
        error,
        teardown_errors,
    )
}

/// 리소스를 선언 순서대로 획득하고 setup 훅을 실행한다.
///
/// 팩토리와 훅은 취소 신호와 경쟁한다. 취소되면 진행 중인 호출을 버리고
/// 그때까지 획득한 리소스만 teardown에서 해제된다.
async fn run_setup(
    definition: &ScenarioDefinition,
    resources: &mut ResourceManager,
    ctx: &SharedExecutionContext,
    cancel: &CancellationToken,
) -> SetupOutcome {
    for spec in &definition.resources {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SetupOutcome::Cancelled,
            acquired = resources.acquire(spec, ctx) => acquired,
        };
        if let Err(err) = acquired {
            return SetupOutcome::Failed(err);
        }
    }
    for (index, hook) in definition.setup.iter().enumerate() {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SetupOutcome::Cancelled,
            result = catch_panic(hook.call(ctx.clone())) => result,
        };
        if let Err(err) = result {
            if let Some(signal) = SkipSignal::find(&err) {
                return SetupOutcome::Skipped(signal.clone());
            }
            return SetupOutcome::Failed(EngineError::SetupHook {
                index,
                message: describe(&err),
            });
        }
    }
    SetupOutcome::Ready
}

/// Step을 순차 실행하고 결과를 컨텍스트에 누적한다.
async fn run_steps(
    definition: &ScenarioDefinition,
    ctx: &SharedExecutionContext,
    emitter: &EventEmitter,
    cancel: &CancellationToken,
) -> RunOutcome {
    let executor = StepExecutor::new(&definition.name, emitter, cancel);
    let mut outcome = RunOutcome {
        steps: Vec::with_capacity(definition.len()),
        cancelled: false,
        first_failure: None,
        skip: None,
    };
    for (index, step) in definition.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            outcome.steps.extend(not_started_steps(
                definition,
                index,
                StepStatus::Cancelled,
                None,
                emitter,
            ));
            break;
        }
        ctx.write().await.begin_step(index);
        emitter.emit(EngineEvent::StepStart {
            scenario: definition.name.clone(),
            step_name: step.name.clone(),
            index,
        });
        let options = step.resolve(&definition.defaults);
        let result = executor.execute(step, index, &options, ctx).await;
        ctx.write().await.finish_step(result.value.clone());
        emit_step_end(definition, &result, emitter);

        let status = result.status;
        match status {
            StepStatus::Failed => {
                if outcome.first_failure.is_none() {
                    outcome.first_failure = result.error.clone().map(EngineError::StepFailed);
                }
            }
            StepStatus::Cancelled => outcome.cancelled = true,
            StepStatus::Skipped => {
                outcome.skip = result.skip_reason.clone().map(SkipSignal::new);
            }
            StepStatus::Passed => {}
        }
        outcome.steps.push(result);

        let stop = match status {
            StepStatus::Passed => false,
            StepStatus::Failed => !definition.continue_on_step_failure,
            StepStatus::Skipped | StepStatus::Cancelled => true,
        };
        if stop {
            let rest = if status == StepStatus::Cancelled {
                StepStatus::Cancelled
            } else {
                StepStatus::Skipped
            };
            outcome
                .steps
                .extend(not_started_steps(definition, index + 1, rest, None, emitter));
            break;
        }
    }
    outcome
}

/// teardown 훅을 선언 순서대로 실행한 뒤 리소스를 역순으로 해제한다.
///
/// 취소할 수 없으며 모든 오류를 모아 반환한다.
async fn run_teardown(
    definition: &ScenarioDefinition,
    resources: &mut ResourceManager,
    ctx: &SharedExecutionContext,
    options: &ScenarioOptions,
) -> Vec<EngineError> {
    let mut errors = Vec::new();
    for (index, hook) in definition.teardown.iter().enumerate() {
        let call = catch_panic(hook.call(ctx.clone()));
        let result = match options.teardown_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("teardown 시간 초과 ({}ms)", limit.as_millis())),
            },
            None => call.await,
        };
        if let Err(err) = result {
            warn!(scenario = %definition.name, index, error = %err, "teardown 훅 실패");
            errors.push(EngineError::TeardownHook {
                index,
                message: describe(&err),
            });
        }
    }
    errors.extend(resources.release_all().await);
    errors
}

/// `from`부터 남은 Step을 시작하지 않은 상태로 기록한다.
fn not_started_steps(
    definition: &ScenarioDefinition,
    from: usize,
    status: StepStatus,
    reason: Option<&str>,
    emitter: &EventEmitter,
) -> Vec<StepResult> {
    definition
        .steps
        .iter()
        .enumerate()
        .skip(from)
        .map(|(index, step)| {
            let result =
                StepResult::not_started(&step.name, index, status, reason.map(str::to_string));
            emit_step_end(definition, &result, emitter);
            result
        })
        .collect()
}

fn emit_step_end(definition: &ScenarioDefinition, result: &StepResult, emitter: &EventEmitter) {
    emitter.emit(EngineEvent::StepEnd {
        scenario: definition.name.clone(),
        step_name: result.name.clone(),
        status: result.status,
        attempts: result.attempts,
        duration: result.duration,
        error: result.message(),
    });
}

fn finish(
    definition: &ScenarioDefinition,
    emitter: &EventEmitter,
    started: Instant,
    status: ScenarioStatus,
    steps: Vec<StepResult>,
    error: Option<EngineError>,
    teardown_errors: Vec<EngineError>,
) -> ScenarioResult {
    let duration = started.elapsed();
    info!(
        scenario = %definition.name,
        status = %status,
        duration_ms = duration.as_millis() as u64,
        teardown_errors = teardown_errors.len(),
        "시나리오 종료"
    );
    emitter.emit(EngineEvent::ScenarioEnd {
        name: definition.name.clone(),
        status,
        duration,
        error: error.as_ref().map(ToString::to_string),
    });
    ScenarioResult {
        name: definition.name.clone(),
        tags: definition.tag_list(),
        status,
        steps,
        duration,
        error,
        teardown_errors,
    }
}
