use super::events::{EngineEvent, EventEmitter};
use super::runner::{ScenarioOptions, run_scenario};
use super::state::{ScenarioResult, ScenarioStatus, StepResult, StepStatus, Summary};
use crate::error::{EngineError, panic_text};
use crate::scenario::ScenarioDefinition;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 스케줄러 실행 옵션이다.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 동시에 Setup~Teardown 단계에 있을 수 있는 시나리오 수. 0은 1로 취급한다.
    pub max_concurrency: usize,
    /// 실패 허용 한도. 0이면 제한이 없다.
    pub max_failures: usize,
    /// 전체 실행 제한 시간. 경과하면 취소가 전파된다.
    pub deadline: Option<Duration>,
    /// 외부 취소 신호.
    pub cancel: CancellationToken,
    /// 시나리오 실행기 옵션.
    pub scenario: ScenarioOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_failures: 0,
            deadline: None,
            cancel: CancellationToken::new(),
            scenario: ScenarioOptions::default(),
        }
    }
}

/// 전체 실행 결과이다. `results`는 입력 순서를 따른다.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.summary.has_failures()
    }
}

/// 실행 중인 시나리오 태스크. panic이 나도 입력 순번을 잃지 않도록 함께 반환한다.
type RunningScenario =
    BoxFuture<'static, (usize, Arc<ScenarioDefinition>, Result<ScenarioResult, JoinError>)>;

/// 여러 시나리오를 제한된 동시성으로 실행한다.
///
/// 큐, 실행 중 개수, 실패 개수는 `run`을 실행하는 단일 태스크만 변경한다.
pub struct Scheduler {
    options: RunOptions,
    emitter: EventEmitter,
}

impl Scheduler {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            emitter: EventEmitter::disabled(),
        }
    }

    /// 라이프사이클 이벤트를 받을 채널을 연결한다.
    pub fn with_events(mut self, sender: UnboundedSender<EngineEvent>) -> Self {
        self.emitter = EventEmitter::new(sender);
        self
    }

    /// 정의 목록을 실행하고 집계 결과를 반환한다.
    ///
    /// 동시에 `max_concurrency`개까지 시나리오 태스크를 띄운다. 실패 허용 한도에
    /// 도달하거나 취소, 데드라인이 발생하면 대기 중인 시나리오는 시작하지 않고
    /// 실행 중인 시나리오는 teardown까지 마치기를 기다린다.
    ///
    /// # 인자
    /// - `scenarios`: 입력 순서대로 실행할 시나리오 정의 목록
    ///
    /// # 반환값
    /// 입력 순서와 같은 순서의 `ScenarioResult` 목록과 `Summary`를 담은 `RunReport`를 반환한다.
    /// 시작하지 못한 시나리오도 Skipped 또는 Cancelled 결과를 가진다.
    pub async fn run(&self, scenarios: Vec<Arc<ScenarioDefinition>>) -> RunReport {
        let started = Instant::now();
        let total = scenarios.len();
        let limit = self.options.max_concurrency.max(1);
        let max_failures = self.options.max_failures;
        // 데드라인 경과 시 외부 토큰을 건드리지 않고 이번 실행만 취소한다.
        let cancel = self.options.cancel.child_token();

        info!(scenarios = total, max_concurrency = limit, max_failures, "실행 시작");
        self.emitter.emit(EngineEvent::RunStart {
            scenario_count: total,
        });

        let mut slots: Vec<Option<ScenarioResult>> = (0..total).map(|_| None).collect();
        let mut queue = scenarios.into_iter().enumerate();
        let mut running: FuturesUnordered<RunningScenario> = FuturesUnordered::new();
        let mut failures = 0usize;
        let mut threshold_reached = false;

        let deadline_limit = self.options.deadline;
        let deadline = async move {
            match deadline_limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let mut deadline_fired = false;

        loop {
            while running.len() < limit && !threshold_reached && !cancel.is_cancelled() {
                let Some((index, definition)) = queue.next() else {
                    break;
                };
                let handle = tokio::spawn(run_scenario(
                    definition.clone(),
                    self.options.scenario.clone(),
                    self.emitter.clone(),
                    cancel.clone(),
                ));
                running.push(Box::pin(async move { (index, definition, handle.await) }));
            }
            if running.is_empty() {
                break;
            }
            tokio::select! {
                Some((index, definition, joined)) = running.next() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(err) => self.panicked(&definition, err),
                    };
                    if result.is_failed() {
                        failures += 1;
                        if max_failures > 0 && failures >= max_failures && !threshold_reached {
                            threshold_reached = true;
                            warn!(failures, limit = max_failures, "실패 허용 한도 도달, 새 시나리오를 시작하지 않음");
                        }
                    }
                    slots[index] = Some(result);
                }
                _ = &mut deadline, if !deadline_fired => {
                    deadline_fired = true;
                    warn!(elapsed_ms = started.elapsed().as_millis() as u64, "실행 제한 시간 경과, 취소 전파");
                    cancel.cancel();
                }
            }
        }

        let mut unstarted = 0usize;
        for (index, definition) in queue {
            let (status, error) = if cancel.is_cancelled() {
                (ScenarioStatus::Cancelled, EngineError::ScenarioCancelled)
            } else {
                (
                    ScenarioStatus::Skipped,
                    EngineError::FailureThresholdReached {
                        limit: max_failures,
                    },
                )
            };
            slots[index] = Some(self.unstarted(&definition, status, error));
            unstarted += 1;
        }
        if unstarted > 0 {
            info!(
                unstarted,
                cancelled = cancel.is_cancelled(),
                "대기 중이던 시나리오를 실행하지 않음"
            );
        }

        let results: Vec<ScenarioResult> = slots.into_iter().flatten().collect();
        let summary = Summary::from_results(&results, started.elapsed());
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            duration_ms = summary.duration.as_millis() as u64,
            "실행 종료"
        );
        self.emitter.emit(EngineEvent::RunEnd {
            summary: summary.clone(),
        });
        RunReport { summary, results }
    }

    /// 시작하지 않은 시나리오의 결과를 기록하고 이벤트를 보낸다.
    fn unstarted(
        &self,
        definition: &ScenarioDefinition,
        status: ScenarioStatus,
        error: EngineError,
    ) -> ScenarioResult {
        let step_status = match status {
            ScenarioStatus::Cancelled => StepStatus::Cancelled,
            _ => StepStatus::Skipped,
        };
        let reason = match &error {
            EngineError::FailureThresholdReached { .. } => Some(error.to_string()),
            _ => None,
        };
        self.emitter.emit(EngineEvent::ScenarioStart {
            name: definition.name.clone(),
            tags: definition.tag_list(),
        });
        let steps: Vec<StepResult> = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let result = StepResult::not_started(&step.name, index, step_status, reason.clone());
                self.emitter.emit(EngineEvent::StepEnd {
                    scenario: definition.name.clone(),
                    step_name: step.name.clone(),
                    status: step_status,
                    attempts: 0,
                    duration: Duration::ZERO,
                    error: result.message(),
                });
                result
            })
            .collect();
        self.emitter.emit(EngineEvent::ScenarioEnd {
            name: definition.name.clone(),
            status,
            duration: Duration::ZERO,
            error: Some(error.to_string()),
        });
        ScenarioResult {
            name: definition.name.clone(),
            tags: definition.tag_list(),
            status,
            steps,
            duration: Duration::ZERO,
            error: Some(error),
            teardown_errors: Vec::new(),
        }
    }

    /// 비정상 종료한 시나리오 태스크를 실패로 기록한다.
    fn panicked(&self, definition: &ScenarioDefinition, err: JoinError) -> ScenarioResult {
        let message = panic_message(err);
        warn!(scenario = %definition.name, message = %message, "시나리오 태스크 비정상 종료");
        let error = EngineError::Panicked { message };
        self.emitter.emit(EngineEvent::ScenarioEnd {
            name: definition.name.clone(),
            status: ScenarioStatus::Failed,
            duration: Duration::ZERO,
            error: Some(error.to_string()),
        });
        ScenarioResult {
            name: definition.name.clone(),
            tags: definition.tag_list(),
            status: ScenarioStatus::Failed,
            steps: Vec::new(),
            duration: Duration::ZERO,
            error: Some(error),
            teardown_errors: Vec::new(),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    panic_text(err.into_panic().as_ref())
}

/// 기본 이벤트 없이 시나리오 목록을 실행한다.
pub async fn run_scenarios(
    scenarios: Vec<Arc<ScenarioDefinition>>,
    options: RunOptions,
) -> RunReport {
    Scheduler::new(options).run(scenarios).await
}
