use crate::action::{StepAction, StepValue, value};
use crate::engine::SharedExecutionContext;
use crate::scenario::{ShellConfig, ShellErrorPolicy};
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

/// 쉘 명령을 실행하고 표준 출력을 Step 값으로 반환한다.
///
/// 제한 시간 초과나 취소로 future가 버려지면 `kill_on_drop`에 의해 자식
/// 프로세스도 종료된다.
pub struct ShellAction {
    step_name: String,
    config: ShellConfig,
}

/// 플레이스홀더 치환이 끝난 실행 인자이다.
struct PreparedCommand {
    script: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<String>,
}

impl ShellAction {
    pub fn new(step_name: impl Into<String>, config: ShellConfig) -> Self {
        Self {
            step_name: step_name.into(),
            config,
        }
    }

    async fn prepare(&self, ctx: &SharedExecutionContext) -> anyhow::Result<PreparedCommand> {
        let guard = ctx.read().await;
        let config = &self.config;
        let script = guard.expand_required(&config.script, "shell.command")?;
        let args = config
            .shell_args
            .iter()
            .map(|arg| guard.expand_required(arg, "shell.arg"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut env = HashMap::new();
        for (key, raw) in &config.env {
            env.insert(key.clone(), guard.expand_required(raw, "shell.env")?);
        }
        let working_dir = match &config.working_dir {
            Some(dir) => Some(guard.expand_required(&dir.to_string_lossy(), "shell.working_dir")?),
            None => None,
        };
        Ok(PreparedCommand {
            script,
            args,
            env,
            working_dir,
        })
    }

    fn build_command(&self, prepared: &PreparedCommand) -> Command {
        let program = self.config.shell_program.clone().unwrap_or_else(|| {
            if cfg!(target_os = "windows") {
                "cmd"
            } else {
                "sh"
            }
            .to_string()
        });
        let mut command = Command::new(program);
        if cfg!(target_os = "windows") {
            command.arg("/C");
        } else {
            command.arg("-c");
        }
        command.arg(&prepared.script);
        command.args(&prepared.args);
        if let Some(dir) = &prepared.working_dir {
            command.current_dir(dir);
        }
        command.envs(&prepared.env);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl StepAction for ShellAction {
    async fn run(&self, ctx: SharedExecutionContext) -> anyhow::Result<StepValue> {
        let prepared = self.prepare(&ctx).await?;
        let mut child = self
            .build_command(&prepared)
            .spawn()
            .with_context(|| format!("쉘 명령 실행 실패: {}", prepared.script))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out_lines, err_lines) = tokio::join!(
            collect_lines(stdout, &self.step_name, "STDOUT"),
            collect_lines(stderr, &self.step_name, "STDERR"),
        );
        let status = child
            .wait()
            .await
            .with_context(|| format!("쉘 명령 대기 실패: {}", prepared.script))?;
        let output = out_lines.join("\n");
        if status.success() {
            return Ok(value(output));
        }
        match self.config.error_policy {
            ShellErrorPolicy::Fail => {
                let detail = err_lines.last().cloned().unwrap_or_default();
                Err(anyhow::anyhow!("쉘 명령 종료 코드: {status} {detail}")
                    .context(format!("Step '{}'", self.step_name)))
            }
            ShellErrorPolicy::Ignore => {
                warn!(step = %self.step_name, %status, "비정상 종료 코드, 정책에 따라 무시");
                Ok(value(output))
            }
        }
    }
}

/// 프로세스 파이프를 줄 단위로 읽어 로그로 남기고 모은다.
async fn collect_lines<R>(reader: Option<R>, step: &str, tag: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut collected = Vec::new();
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    while let Some(line_result) = lines.next().await {
        match line_result {
            Ok(line) => {
                debug!(step, stream = tag, "{line}");
                collected.push(line);
            }
            Err(err) => {
                warn!(step, stream = tag, error = %err, "출력 읽기 오류");
                break;
            }
        }
    }
    collected
}
