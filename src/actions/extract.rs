use crate::action::{StepAction, StepValue, value};
use crate::engine::SharedExecutionContext;
use crate::scenario::ExtractVarFromFileConfig;
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// 파일의 지정된 줄에서 정규식 캡처 값을 추출해 컨텍스트에 저장한다.
pub struct ExtractAction {
    step_name: String,
    config: ExtractVarFromFileConfig,
}

impl ExtractAction {
    pub fn new(step_name: impl Into<String>, config: ExtractVarFromFileConfig) -> Self {
        Self {
            step_name: step_name.into(),
            config,
        }
    }
}

#[async_trait]
impl StepAction for ExtractAction {
    async fn run(&self, ctx: SharedExecutionContext) -> anyhow::Result<StepValue> {
        let config = &self.config;
        let file_path = {
            let guard = ctx.read().await;
            guard.expand_required(&config.file_path, "extract.file_path")?
        };
        let file = File::open(&file_path)
            .await
            .with_context(|| format!("파일을 열 수 없습니다: {file_path}"))?;
        let mut reader = BufReader::new(file).lines();
        let mut current_line = None;
        for i in 1..=config.line {
            match reader.next_line().await? {
                Some(line) if i == config.line => current_line = Some(line),
                Some(_) => {}
                None => {
                    anyhow::bail!("{file_path}에서 {}번째 줄을 찾을 수 없습니다.", config.line)
                }
            }
        }
        let content = current_line
            .ok_or_else(|| anyhow::anyhow!("줄 번호는 1 이상이어야 합니다: {}", config.line))?;
        let re = Regex::new(&config.pattern)
            .with_context(|| format!("정규식 컴파일 실패: {}", config.pattern))?;
        let captures = re
            .captures(&content)
            .ok_or_else(|| anyhow::anyhow!("패턴이 매칭되지 않았습니다: {content}"))?;
        let extracted = captures
            .get(config.group)
            .ok_or_else(|| anyhow::anyhow!("캡처 그룹 {}을 찾을 수 없습니다.", config.group))?
            .as_str()
            .to_string();
        {
            let mut guard = ctx.write().await;
            guard.set(config.var_name.clone(), extracted.clone());
        }
        debug!(step = %self.step_name, var = %config.var_name, value = %extracted, "변수 추출");
        Ok(value(extracted))
    }
}
