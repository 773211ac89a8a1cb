use crate::engine::SharedExecutionContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// Step 결과 값이다. 이종 값을 담기 위해 타입 소거된 공유 포인터를 사용한다.
///
/// 다음 Step은 `ExecutionContext::previous::<T>()`로 이전 Step이 선언한
/// 출력 타입 `T`를 검사 후 꺼내 쓴다. 타입이 다르면 `None`이 반환된다.
pub type StepValue = Arc<dyn Any + Send + Sync>;

/// 임의의 값을 StepValue로 감싼다.
pub fn value<T: Any + Send + Sync>(inner: T) -> StepValue {
    Arc::new(inner)
}

/// 값을 반환하지 않는 Step에서 사용하는 단위 값이다.
pub fn unit() -> StepValue {
    Arc::new(())
}

/// StepAction은 Step 본문을 실행하는 추상 계층을 정의한다.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// 현재 컨텍스트를 받아 값을 생성하거나 실패한다.
    async fn run(&self, ctx: SharedExecutionContext) -> anyhow::Result<StepValue>;
}

/// StepAction을 공유하기 위한 Arc 타입 별칭이다.
pub type SharedAction = Arc<dyn StepAction>;

/// 비동기 클로저를 StepAction으로 감싼다.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(SharedExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StepValue>> + Send,
{
    async fn run(&self, ctx: SharedExecutionContext) -> anyhow::Result<StepValue> {
        (self.0)(ctx).await
    }
}

/// setup/teardown 훅의 추상 계층이다.
#[async_trait]
pub trait Hook: Send + Sync {
    /// 컨텍스트를 대상으로 훅을 실행한다.
    async fn call(&self, ctx: SharedExecutionContext) -> anyhow::Result<()>;
}

/// Hook을 공유하기 위한 Arc 타입 별칭이다.
pub type SharedHook = Arc<dyn Hook>;

/// 비동기 클로저를 Hook으로 감싼다.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F, Fut> Hook for FnHook<F>
where
    F: Fn(SharedExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn call(&self, ctx: SharedExecutionContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// StepAction을 훅으로 재사용한다. 반환 값은 버린다.
pub struct ActionHook(pub SharedAction);

#[async_trait]
impl Hook for ActionHook {
    async fn call(&self, ctx: SharedExecutionContext) -> anyhow::Result<()> {
        self.0.run(ctx).await.map(|_| ())
    }
}

/// 리소스 정리 콜백이다. 정확히 한 번만 호출된다.
pub type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// 팩토리가 생성한 리소스 인스턴스와 선택적 정리 콜백이다.
pub struct Resource {
    /// 컨텍스트에 등록될 인스턴스.
    pub instance: StepValue,
    /// 해제 시 호출할 콜백.
    pub(crate) cleanup: Option<Cleanup>,
}

impl Resource {
    /// 정리 콜백이 없는 리소스를 생성한다.
    pub fn new<T: Any + Send + Sync>(instance: T) -> Self {
        Self {
            instance: Arc::new(instance),
            cleanup: None,
        }
    }

    /// 이미 공유 중인 인스턴스로 리소스를 생성한다.
    pub fn shared(instance: StepValue) -> Self {
        Self {
            instance,
            cleanup: None,
        }
    }

    /// 정리 콜백을 등록한다.
    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Box::new(move || Box::pin(cleanup())));
        self
    }

    /// 정리 콜백 보유 여부.
    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }
}

/// ResourceFactory는 시나리오 단위 리소스를 생성한다.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// 리소스를 생성한다.
    async fn acquire(&self, ctx: SharedExecutionContext) -> anyhow::Result<Resource>;
}

/// ResourceFactory를 공유하기 위한 Arc 타입 별칭이다.
pub type SharedFactory = Arc<dyn ResourceFactory>;

/// 비동기 클로저를 ResourceFactory로 감싼다.
pub struct FnFactory<F>(pub F);

#[async_trait]
impl<F, Fut> ResourceFactory for FnFactory<F>
where
    F: Fn(SharedExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Resource>> + Send,
{
    async fn acquire(&self, ctx: SharedExecutionContext) -> anyhow::Result<Resource> {
        (self.0)(ctx).await
    }
}
