use crate::action::{FnAction, FnFactory, Resource, SharedAction, SharedFactory, SharedHook, StepValue};
use crate::engine::SharedExecutionContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 재시도 사이 대기 시간 계산 방식이다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// 대기 없이 즉시 재시도한다.
    #[default]
    None,
    /// base × attempt.
    Linear,
    /// base × 2^(attempt-1).
    Exponential,
}

/// Step 재시도 정책이다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최초 실행을 포함한 최대 시도 횟수. 0은 1로 취급한다.
    pub max_attempts: u32,
    /// 대기 방식.
    pub backoff: Backoff,
    /// 기준 대기 시간.
    pub base_delay: Duration,
    /// 대기 시간 상한.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            base_delay: Duration::ZERO,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// 재시도 없이 한 번만 실행하는 정책.
    pub fn once() -> Self {
        Self::default()
    }

    /// 대기 없이 `max_attempts`번까지 시도하는 정책.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// 선형 대기 정책.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear,
            base_delay,
            max_delay: None,
        }
    }

    /// 지수 대기 정책.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential,
            base_delay,
            max_delay: None,
        }
    }

    /// 대기 시간 상한을 지정한다.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// 실제 적용되는 최대 시도 횟수.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// `attempt`번째 시도(1부터 시작)가 실패한 뒤 적용할 대기 시간을 계산한다.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Step 단위 실행 옵션이다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOptions {
    /// 시도당 제한 시간.
    pub timeout: Duration,
    /// 재시도 정책.
    pub retry: RetryPolicy,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Step 정의이다.
#[derive(Clone)]
pub struct StepDefinition {
    /// Step 이름.
    pub name: String,
    /// 실행할 액션.
    pub action: SharedAction,
    /// 시나리오 기본값을 덮어쓰는 제한 시간.
    pub timeout: Option<Duration>,
    /// 시나리오 기본값을 덮어쓰는 재시도 정책.
    pub retry: Option<RetryPolicy>,
}

impl StepDefinition {
    /// 이름과 액션으로 Step을 정의한다.
    pub fn new(name: impl Into<String>, action: SharedAction) -> Self {
        Self {
            name: name.into(),
            action,
            timeout: None,
            retry: None,
        }
    }

    /// 비동기 클로저로 Step을 정의한다.
    pub fn from_fn<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StepValue>> + Send + 'static,
    {
        Self::new(name, Arc::new(FnAction(action)))
    }

    /// 제한 시간을 지정한다.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 재시도 정책을 지정한다.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 시나리오 기본값과 합쳐 실제 옵션을 계산한다.
    pub fn resolve(&self, defaults: &StepOptions) -> StepOptions {
        StepOptions {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry: self.retry.clone().unwrap_or_else(|| defaults.retry.clone()),
        }
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// 이름 붙은 리소스 팩토리이다.
#[derive(Clone)]
pub struct ResourceSpec {
    /// 컨텍스트에 등록될 리소스 이름.
    pub name: String,
    /// 생성 팩토리.
    pub factory: SharedFactory,
}

impl ResourceSpec {
    /// 비동기 클로저 팩토리로 리소스를 정의한다.
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resource>> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(FnFactory(factory)),
        }
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 실행 여부를 판단하는 술어이다. `Some(사유)`를 반환하면 시나리오를 건너뛴다.
pub type SkipPredicate = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// 외부에서 생성된 불변 시나리오 정의이다.
///
/// `ScenarioDefinition::builder`로 만들고 `Arc`로 공유한다.
#[derive(Clone)]
pub struct ScenarioDefinition {
    /// 시나리오 이름.
    pub name: String,
    /// 태그 집합.
    pub tags: BTreeSet<String>,
    /// 선택적 생략 술어.
    pub skip: Option<SkipPredicate>,
    /// Step 기본 옵션.
    pub defaults: StepOptions,
    /// 선언 순서대로 획득할 리소스 목록.
    pub resources: Vec<ResourceSpec>,
    /// setup 훅 목록.
    pub setup: Vec<SharedHook>,
    /// Step 목록.
    pub steps: Vec<StepDefinition>,
    /// teardown 훅 목록.
    pub teardown: Vec<SharedHook>,
    /// Step 실패 후에도 다음 Step을 계속 실행할지 여부.
    pub continue_on_step_failure: bool,
}

impl ScenarioDefinition {
    /// 전체 Step 수를 반환한다.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Step이 비었는지 확인한다.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 태그 목록을 정렬된 벡터로 반환한다.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }

    /// 주어진 태그 중 하나라도 가지고 있는지 확인한다.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }
}

impl fmt::Debug for ScenarioDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioDefinition")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("skip", &self.skip.is_some())
            .field("defaults", &self.defaults)
            .field("resources", &self.resources)
            .field("setup", &self.setup.len())
            .field("steps", &self.steps)
            .field("teardown", &self.teardown.len())
            .field("continue_on_step_failure", &self.continue_on_step_failure)
            .finish()
    }
}
