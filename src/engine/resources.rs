use super::context::SharedExecutionContext;
use crate::action::Cleanup;
use crate::error::{EngineError, catch_panic, describe};
use crate::scenario::ResourceSpec;
use std::time::Duration;
use tracing::{debug, warn};

/// 획득에 성공한 리소스의 정리 핸들이다.
///
/// `Drop`에 의존하지 않고 `ResourceManager::release_all`이 명시적으로 `dispose`를 호출한다.
pub struct ResourceGuard {
    /// 리소스 이름.
    name: String,
    /// 정리 콜백.
    cleanup: Cleanup,
}

impl ResourceGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 정리 콜백을 실행한다. `grace`가 있으면 그 시간 안에 끝나야 한다.
    async fn dispose(self, grace: Option<Duration>) -> Result<(), EngineError> {
        let name = self.name;
        let future = catch_panic((self.cleanup)());
        let outcome = match grace {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "정리 시간 초과 ({}ms)",
                    limit.as_millis()
                )),
            },
            None => future.await,
        };
        outcome.map_err(|err| EngineError::ResourceTeardown {
            name,
            message: describe(&err),
        })
    }
}

/// 시나리오 단위 리소스의 획득과 역순 해제를 관리한다.
pub struct ResourceManager {
    /// 정리 콜백 스택. 마지막에 획득한 리소스가 먼저 해제된다.
    stack: Vec<ResourceGuard>,
    /// 획득 순서대로 기록된 리소스 이름.
    acquired: Vec<String>,
    /// 정리 콜백당 허용 시간.
    grace: Option<Duration>,
}

impl ResourceManager {
    /// 정리 콜백당 허용 시간을 지정해 관리자를 생성한다.
    pub fn new(grace: Option<Duration>) -> Self {
        Self {
            stack: Vec::new(),
            acquired: Vec::new(),
            grace,
        }
    }

    /// 팩토리를 호출해 리소스를 획득하고 컨텍스트에 등록한다.
    ///
    /// 실패하면 이미 획득한 리소스는 그대로 스택에 남으며, 호출 측이
    /// `release_all`로 해제해야 한다. 이 future가 도중에 버려지면 해당
    /// 리소스는 등록되지 않는다.
    ///
    /// # 인자
    /// - `spec`: 리소스 이름과 팩토리
    /// - `ctx`: 팩토리에 넘기고 인스턴스를 등록할 실행 컨텍스트
    ///
    /// # 반환값
    /// 성공 시 `Ok(())`, 팩토리가 실패하거나 panic하면 `EngineError::ResourceSetup`을 반환한다.
    pub async fn acquire(
        &mut self,
        spec: &ResourceSpec,
        ctx: &SharedExecutionContext,
    ) -> Result<(), EngineError> {
        let resource = catch_panic(spec.factory.acquire(ctx.clone()))
            .await
            .map_err(|err| EngineError::ResourceSetup {
                name: spec.name.clone(),
                message: describe(&err),
            })?;
        {
            let mut guard = ctx.write().await;
            guard.register_resource(spec.name.clone(), resource.instance);
        }
        if let Some(cleanup) = resource.cleanup {
            self.stack.push(ResourceGuard {
                name: spec.name.clone(),
                cleanup,
            });
        }
        self.acquired.push(spec.name.clone());
        debug!(resource = %spec.name, "리소스 획득");
        Ok(())
    }

    /// 획득한 모든 리소스를 역순으로 해제한다.
    ///
    /// 개별 정리 실패에서 멈추지 않는다. 두 번째 호출부터는 스택이 비어
    /// 있으므로 아무 일도 하지 않는다.
    ///
    /// # 반환값
    /// 실패, 시간 초과, panic한 정리 콜백마다 `EngineError::ResourceTeardown` 하나씩을
    /// 해제 순서대로 담아 반환한다. 모두 성공하면 빈 벡터이다.
    pub async fn release_all(&mut self) -> Vec<EngineError> {
        let mut errors = Vec::new();
        while let Some(guard) = self.stack.pop() {
            let name = guard.name().to_string();
            match guard.dispose(self.grace).await {
                Ok(()) => debug!(resource = %name, "리소스 해제"),
                Err(err) => {
                    warn!(resource = %name, error = %err, "리소스 해제 실패");
                    errors.push(err);
                }
            }
        }
        errors
    }

    /// 획득 순서대로 기록된 리소스 이름.
    pub fn acquired(&self) -> &[String] {
        &self.acquired
    }

    /// 아직 해제되지 않은 정리 콜백 수.
    pub fn pending(&self) -> usize {
        self.stack.len()
    }
}
