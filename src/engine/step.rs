use super::context::SharedExecutionContext;
use super::events::{EngineEvent, EventEmitter};
use super::state::{StepResult, StepStatus};
use crate::action::StepValue;
use crate::error::{SkipSignal, StepError, catch_panic, describe};
use crate::scenario::{StepDefinition, StepOptions};
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 시도 한 번의 결과이다.
enum AttemptOutcome {
    Passed(StepValue),
    Failed(StepError),
    Skipped(String),
    Cancelled,
}

/// 제한 시간과 재시도 정책에 따라 Step 하나를 실행한다.
pub struct StepExecutor<'a> {
    scenario: &'a str,
    emitter: &'a EventEmitter,
    cancel: &'a CancellationToken,
}

impl<'a> StepExecutor<'a> {
    pub fn new(scenario: &'a str, emitter: &'a EventEmitter, cancel: &'a CancellationToken) -> Self {
        Self {
            scenario,
            emitter,
            cancel,
        }
    }

    /// Step을 실행하고 결과를 반환한다.
    ///
    /// 각 시도는 액션, 제한 시간, 취소 신호의 경쟁이다. 제한 시간이 먼저 끝나면
    /// 액션 future는 버려지고 더 이상 기다리지 않는다. 실패한 시도 뒤에 남은
    /// 시도가 있으면 재시도 정책의 대기 시간만큼 쉰다.
    ///
    /// # 인자
    /// - `step`: 실행할 Step 정의
    /// - `index`: 시나리오 안에서의 Step 순번
    /// - `options`: 시나리오 기본값이 반영된 제한 시간과 재시도 정책
    /// - `ctx`: 액션에 넘길 실행 컨텍스트 공유 포인터
    ///
    /// # 반환값
    /// 최종 상태, 사용한 시도 횟수, 값 또는 오류를 담은 `StepResult`를 반환한다.
    /// 실패는 `Err`가 아니라 결과의 상태로 표현된다.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        index: usize,
        options: &StepOptions,
        ctx: &SharedExecutionContext,
    ) -> StepResult {
        let started = Instant::now();
        let max_attempts = options.retry.effective_attempts();
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return self.finish(step, index, started, attempt, AttemptOutcome::Cancelled);
            }
            attempt += 1;
            debug!(scenario = self.scenario, step = %step.name, attempt, "Step 시도");
            let outcome = self.attempt(step, options, ctx).await;
            let err = match outcome {
                AttemptOutcome::Failed(err) => err,
                other => return self.finish(step, index, started, attempt, other),
            };
            if attempt >= max_attempts {
                return self.finish(step, index, started, attempt, AttemptOutcome::Failed(err));
            }
            let delay = options.retry.delay_for_attempt(attempt);
            warn!(
                scenario = self.scenario,
                step = %step.name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Step 실패, 대기 후 재시도"
            );
            self.emitter.emit(EngineEvent::StepRetry {
                scenario: self.scenario.to_string(),
                step_name: step.name.clone(),
                attempt,
                delay,
                error: err.to_string(),
            });
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return self.finish(step, index, started, attempt, AttemptOutcome::Cancelled);
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }

    /// 시도 한 번을 제한 시간 및 취소 신호와 경쟁시킨다. 액션의 panic은 실패한 시도로 취급한다.
    async fn attempt(
        &self,
        step: &StepDefinition,
        options: &StepOptions,
        ctx: &SharedExecutionContext,
    ) -> AttemptOutcome {
        let action = catch_panic(step.action.run(ctx.clone()));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => AttemptOutcome::Cancelled,
            result = tokio::time::timeout(options.timeout, action) => match result {
                Ok(Ok(value)) => AttemptOutcome::Passed(value),
                Ok(Err(err)) => match SkipSignal::find(&err) {
                    Some(signal) => AttemptOutcome::Skipped(signal.reason.clone()),
                    None => AttemptOutcome::Failed(StepError::Execution {
                        step: step.name.clone(),
                        message: describe(&err),
                    }),
                },
                Err(_) => AttemptOutcome::Failed(StepError::Timeout {
                    step: step.name.clone(),
                    timeout: options.timeout,
                }),
            },
        }
    }

    fn finish(
        &self,
        step: &StepDefinition,
        index: usize,
        started: Instant,
        attempts: u32,
        outcome: AttemptOutcome,
    ) -> StepResult {
        let (status, value, error, skip_reason) = match outcome {
            AttemptOutcome::Passed(value) => (StepStatus::Passed, Some(value), None, None),
            AttemptOutcome::Failed(err) => (StepStatus::Failed, None, Some(err), None),
            AttemptOutcome::Skipped(reason) => (StepStatus::Skipped, None, None, Some(reason)),
            AttemptOutcome::Cancelled => (
                StepStatus::Cancelled,
                None,
                Some(StepError::Cancelled {
                    step: step.name.clone(),
                }),
                None,
            ),
        };
        StepResult {
            name: step.name.clone(),
            index,
            status,
            attempts,
            duration: started.elapsed(),
            value,
            error,
            skip_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{unit, value};
    use crate::engine::new_shared_context;
    use crate::scenario::RetryPolicy;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn options(timeout_ms: u64, retry: RetryPolicy) -> StepOptions {
        StepOptions {
            timeout: Duration::from_millis(timeout_ms),
            retry,
        }
    }

    fn always_failing(counter: Arc<AtomicU32>) -> StepDefinition {
        StepDefinition::from_fn("flaky", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("503 Service Unavailable"))
            }
        })
    }

    #[tokio::test]
    async fn always_failing_step_uses_every_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = always_failing(counter.clone());
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let result = executor
            .execute(&step, 0, &options(1000, RetryPolicy::attempts(4)), &new_shared_context())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(matches!(result.error, Some(StepError::Execution { .. })));
    }

    #[tokio::test]
    async fn linear_backoff_delays_between_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = always_failing(counter.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(tx);
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);
        let retry = RetryPolicy::linear(3, Duration::from_millis(40));

        let started = Instant::now();
        let result = executor
            .execute(&step, 0, &options(1000, retry), &new_shared_context())
            .await;
        let elapsed = started.elapsed();

        // 40ms + 80ms
        assert!(elapsed >= Duration::from_millis(115), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "elapsed {elapsed:?}");
        assert_eq!(result.attempts, 3);

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::StepRetry { attempt, delay, .. } = event {
                delays.push((attempt, delay));
            }
        }
        assert_eq!(
            delays,
            [
                (1, Duration::from_millis(40)),
                (2, Duration::from_millis(80))
            ]
        );
    }

    #[tokio::test]
    async fn passes_on_first_successful_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = {
            let counter = counter.clone();
            StepDefinition::from_fn("eventually", move |_ctx| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 2 {
                        anyhow::bail!("not yet");
                    }
                    Ok(value(n))
                }
            })
        };
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let result = executor
            .execute(&step, 0, &options(1000, RetryPolicy::attempts(5)), &new_shared_context())
            .await;

        assert_eq!(result.status, StepStatus::Passed);
        assert_eq!(result.attempts, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let v = result.value.as_ref().and_then(|v| v.downcast_ref::<u32>());
        assert_eq!(v, Some(&2));
    }

    #[tokio::test]
    async fn timeout_abandons_slow_action() {
        let step = StepDefinition::from_fn("slow", |_ctx| async move {
            sleep(Duration::from_secs(5)).await;
            Ok(unit())
        });
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let started = Instant::now();
        let result = executor
            .execute(&step, 0, &options(50, RetryPolicy::once()), &new_shared_context())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.as_ref().is_some_and(StepError::is_timeout));
        assert!(elapsed >= Duration::from_millis(45), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn skip_signal_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = {
            let counter = counter.clone();
            StepDefinition::from_fn("optional", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SkipSignal::new("feature flag off").into())
                }
            })
        };
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let result = executor
            .execute(&step, 0, &options(1000, RetryPolicy::attempts(3)), &new_shared_context())
            .await;

        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("feature flag off"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_action_is_a_failed_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = {
            let counter = counter.clone();
            StepDefinition::from_fn("fragile", move |_ctx| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("index out of bounds");
                    }
                    Ok(value(3u8))
                }
            })
        };
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let result = executor
            .execute(&step, 0, &options(1000, RetryPolicy::attempts(2)), &new_shared_context())
            .await;

        assert_eq!(result.status, StepStatus::Passed);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let counter = Arc::new(AtomicU32::new(0));
        let step = always_failing(counter.clone());
        let emitter = EventEmitter::disabled();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let executor = StepExecutor::new("s", &emitter, &cancel);

        let started = Instant::now();
        let result = executor
            .execute(
                &step,
                0,
                &options(1000, RetryPolicy::linear(5, Duration::from_secs(10))),
                &new_shared_context(),
            )
            .await;

        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(result.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
