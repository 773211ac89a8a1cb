use super::definition::{
    ResourceSpec, RetryPolicy, ScenarioDefinition, StepDefinition, StepOptions,
};
use crate::action::{FnHook, Resource, SharedHook, StepValue};
use crate::engine::SharedExecutionContext;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 시나리오 정의를 단계적으로 조립한다.
///
/// 각 메서드는 빌더를 소비하고 다음 상태를 반환하며, `build`가 불변 정의를 만든다.
///
/// ```rust,ignore
/// let scenario = ScenarioDefinition::builder("login")
///     .tag("smoke")
///     .step("fetch", |_ctx| async move { Ok(value(200u16)) })
///     .step("check", |ctx| async move {
///         let status = ctx.read().await.previous::<u16>().copied();
///         anyhow::ensure!(status == Some(200), "unexpected status {status:?}");
///         Ok(unit())
///     })
///     .build();
/// ```
pub struct ScenarioBuilder {
    inner: ScenarioDefinition,
}

impl ScenarioDefinition {
    /// 빌더를 시작한다.
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            inner: ScenarioDefinition {
                name: name.into(),
                tags: BTreeSet::new(),
                skip: None,
                defaults: StepOptions::default(),
                resources: Vec::new(),
                setup: Vec::new(),
                steps: Vec::new(),
                teardown: Vec::new(),
                continue_on_step_failure: false,
            },
        }
    }
}

impl ScenarioBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.inner.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// 술어가 true이면 시나리오 전체를 건너뛴다.
    pub fn skip_if<F>(self, reason: impl Into<String>, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let reason = reason.into();
        self.skip_when(move || predicate().then(|| reason.clone()))
    }

    /// 사유를 직접 계산하는 생략 술어를 지정한다. 이전 술어는 대체된다.
    pub fn skip_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.inner.skip = Some(Arc::new(predicate));
        self
    }

    /// Step 기본 제한 시간.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.defaults.timeout = timeout;
        self
    }

    /// Step 기본 재시도 정책.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.inner.defaults.retry = retry;
        self
    }

    pub fn continue_on_step_failure(mut self, enabled: bool) -> Self {
        self.inner.continue_on_step_failure = enabled;
        self
    }

    /// 리소스 팩토리를 추가한다. 선언 순서대로 획득되고 역순으로 해제된다.
    pub fn resource<F, Fut>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resource>> + Send + 'static,
    {
        self.inner.resources.push(ResourceSpec::new(name, factory));
        self
    }

    pub fn resource_spec(mut self, spec: ResourceSpec) -> Self {
        self.inner.resources.push(spec);
        self
    }

    pub fn setup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.setup.push(Arc::new(FnHook(hook)));
        self
    }

    pub fn setup_hook(mut self, hook: SharedHook) -> Self {
        self.inner.setup.push(hook);
        self
    }

    /// 시나리오 기본 옵션을 사용하는 Step을 추가한다.
    pub fn step<F, Fut>(self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StepValue>> + Send + 'static,
    {
        self.step_with(StepDefinition::from_fn(name, action))
    }

    /// 옵션을 직접 지정한 Step을 추가한다.
    pub fn step_with(mut self, step: StepDefinition) -> Self {
        self.inner.steps.push(step);
        self
    }

    pub fn teardown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SharedExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.teardown.push(Arc::new(FnHook(hook)));
        self
    }

    pub fn teardown_hook(mut self, hook: SharedHook) -> Self {
        self.inner.teardown.push(hook);
        self
    }

    /// 불변 정의를 생성한다.
    pub fn build(self) -> Arc<ScenarioDefinition> {
        Arc::new(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::unit;

    #[test]
    fn builder_keeps_declaration_order() {
        let def = ScenarioDefinition::builder("order")
            .tags(["b", "a"])
            .resource("db", |_ctx| async move { Ok(Resource::new(1u8)) })
            .resource("cache", |_ctx| async move { Ok(Resource::new(2u8)) })
            .step("one", |_ctx| async move { Ok(unit()) })
            .step_with(
                StepDefinition::from_fn("two", |_ctx| async move { Ok(unit()) })
                    .timeout(Duration::from_millis(5)),
            )
            .build();

        let names: Vec<&str> = def.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["one", "two"]);
        let resources: Vec<&str> = def.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(resources, ["db", "cache"]);
        assert_eq!(def.tag_list(), ["a", "b"]);
        assert_eq!(
            def.steps[1].resolve(&def.defaults).timeout,
            Duration::from_millis(5)
        );
        assert_eq!(def.steps[0].resolve(&def.defaults), def.defaults);
    }

    #[test]
    fn skip_predicate_reports_reason() {
        let def = ScenarioDefinition::builder("skipped")
            .skip_if("not on ci", || true)
            .build();
        let reason = def.skip.as_ref().and_then(|pred| pred());
        assert_eq!(reason.as_deref(), Some("not on ci"));
    }
}
