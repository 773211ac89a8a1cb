use crate::action::{StepAction, StepValue, value};
use crate::engine::SharedExecutionContext;
use async_trait::async_trait;
use tracing::debug;

/// 플레이스홀더를 치환한 문자열을 컨텍스트에 저장한다.
pub struct SetVarAction {
    key: String,
    template: String,
}

impl SetVarAction {
    pub fn new(key: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            template: template.into(),
        }
    }
}

#[async_trait]
impl StepAction for SetVarAction {
    async fn run(&self, ctx: SharedExecutionContext) -> anyhow::Result<StepValue> {
        let mut guard = ctx.write().await;
        let resolved = guard.expand_required(&self.template, "set_var.value")?;
        debug!(key = %self.key, value = %resolved, "변수 저장");
        guard.set(self.key.clone(), resolved.clone());
        Ok(value(resolved))
    }
}
