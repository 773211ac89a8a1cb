use super::definition::{Backoff, RetryPolicy, ScenarioDefinition, StepDefinition};
use crate::action::ActionHook;
use crate::actions::action_for;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// 시나리오 파일 검증 오류이다.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioFileError {
    #[error("timeout_sec는 0보다 커야 합니다.")]
    ZeroTimeout,
    #[error("Step '{step}'의 timeout_sec는 0보다 커야 합니다.")]
    ZeroStepTimeout { step: String },
}

/// Shell Step 실행 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// 실제 실행할 스크립트/명령 문자열.
    #[serde(alias = "command")]
    pub script: String,
    /// 사용할 셸 프로그램 경로.
    pub shell_program: Option<String>,
    /// 셸 프로그램 추가 인자 목록.
    #[serde(default)]
    pub shell_args: Vec<String>,
    /// 스크립트 실행 시 적용할 환경 변수.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 실행 전 변경할 작업 디렉터리.
    pub working_dir: Option<PathBuf>,
    /// 비정상 종료 시 처리 정책.
    #[serde(default)]
    pub error_policy: ShellErrorPolicy,
}

/// Shell Step 실패 처리 정책이다. 재시도는 Step의 `retry` 설정이 담당한다.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShellErrorPolicy {
    /// 비정상 종료 시 Step을 실패로 처리한다.
    #[default]
    Fail,
    /// 비정상 종료여도 Step을 성공으로 간주한다.
    Ignore,
}

/// 파일의 특정 줄에서 정규식으로 값을 추출하는 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractVarFromFileConfig {
    /// 읽을 파일 경로.
    pub file_path: String,
    /// 1 기반 라인 번호.
    pub line: usize,
    /// 매칭에 사용할 정규식 패턴.
    pub pattern: String,
    /// 사용할 캡처 그룹 번호.
    #[serde(default = "default_group")]
    pub group: usize,
    /// 저장할 변수명.
    pub var_name: String,
}

/// StepKind는 YAML Step이 수행할 내장 작업 유형을 표현한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// 쉘 명령을 실행한다.
    Shell {
        #[serde(rename = "shell")]
        config: ShellConfig,
    },
    /// 파일에서 변수를 추출한다.
    ExtractVarFromFile {
        #[serde(rename = "extract")]
        config: ExtractVarFromFileConfig,
    },
    /// 컨텍스트에 값을 저장한다.
    SetVar { key: String, value: String },
}

/// YAML에 기술된 Step이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step 이름.
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// 실패 시 재시도 횟수. 없으면 시나리오 기본값을 따른다.
    #[serde(default)]
    pub retry: Option<u32>,
    /// 시도당 제한 시간(초 단위).
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub backoff: Option<Backoff>,
    /// 기준 대기 시간(밀리초).
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

/// YAML 시나리오 파일의 최상위 구조이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    /// 시나리오의 표시 이름.
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 값이 있으면 해당 사유로 항상 생략한다.
    #[serde(default)]
    pub skip: Option<String>,
    /// 이 환경 변수가 없으면 생략한다.
    #[serde(default)]
    pub skip_unless_env: Option<String>,
    /// setup 단계에서 컨텍스트에 저장할 변수.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Step 기본 재시도 횟수.
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// Step 기본 제한 시간(초 단위).
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub setup: Vec<StepSpec>,
    /// Step 목록.
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub teardown: Vec<StepSpec>,
}

impl ScenarioFile {
    /// 값 범위를 검증한다. 로더가 파싱 직후 호출한다.
    pub fn validate(&self) -> Result<(), ScenarioFileError> {
        if self.timeout_sec == 0 {
            return Err(ScenarioFileError::ZeroTimeout);
        }
        let mut all = self.setup.iter().chain(&self.steps).chain(&self.teardown);
        if let Some(spec) = all.find(|spec| spec.timeout_sec == Some(0)) {
            return Err(ScenarioFileError::ZeroStepTimeout {
                step: spec.name.clone(),
            });
        }
        Ok(())
    }

    /// 실행 가능한 불변 시나리오 정의로 변환한다.
    pub fn into_definition(self) -> Arc<ScenarioDefinition> {
        let mut builder = ScenarioDefinition::builder(&self.name)
            .tags(self.tags)
            .timeout(Duration::from_secs(self.timeout_sec))
            .retry(retry_policy(self.retry, self.backoff, self.backoff_ms))
            .continue_on_step_failure(self.continue_on_failure);

        let skip = self.skip;
        let required_env = self.skip_unless_env;
        if skip.is_some() || required_env.is_some() {
            builder = builder.skip_when(move || {
                if let Some(reason) = &skip {
                    return Some(reason.clone());
                }
                let var = required_env.as_deref()?;
                std::env::var_os(var)
                    .is_none()
                    .then(|| format!("환경 변수 {var}가 설정되지 않았습니다."))
            });
        }

        if !self.vars.is_empty() {
            let vars = Arc::new(self.vars);
            builder = builder.setup(move |ctx| {
                let vars = vars.clone();
                async move {
                    let mut guard = ctx.write().await;
                    for (key, raw) in vars.iter() {
                        let value = guard.expand_required(raw, &format!("vars.{key}"))?;
                        guard.set(key.clone(), value);
                    }
                    Ok(())
                }
            });
        }
        for spec in &self.setup {
            builder = builder.setup_hook(Arc::new(ActionHook(action_for(&spec.name, &spec.kind))));
        }
        for spec in self.steps {
            let mut step = StepDefinition::new(&spec.name, action_for(&spec.name, &spec.kind));
            if let Some(secs) = spec.timeout_sec {
                step = step.timeout(Duration::from_secs(secs));
            }
            if spec.retry.is_some() || spec.backoff.is_some() || spec.backoff_ms.is_some() {
                step = step.retry(retry_policy(
                    spec.retry.unwrap_or(self.retry),
                    spec.backoff.unwrap_or(self.backoff),
                    spec.backoff_ms.unwrap_or(self.backoff_ms),
                ));
            }
            builder = builder.step_with(step);
        }
        for spec in &self.teardown {
            builder =
                builder.teardown_hook(Arc::new(ActionHook(action_for(&spec.name, &spec.kind))));
        }
        builder.build()
    }
}

/// 재시도 횟수를 최초 실행을 포함한 시도 횟수로 변환한다.
fn retry_policy(retry: u32, backoff: Backoff, backoff_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: retry.saturating_add(1),
        backoff,
        base_delay: Duration::from_millis(backoff_ms),
        max_delay: None,
    }
}

fn default_retry() -> u32 {
    0
}

fn default_timeout() -> u64 {
    60
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_group() -> usize {
    1
}

/// YAML 파일을 읽어 ScenarioFile로 역직렬화한다.
pub fn load_scenario_from_file(path: &Path) -> anyhow::Result<ScenarioFile> {
    let mut file = File::open(path)
        .with_context(|| format!("시나리오 파일을 열 수 없습니다: {}", path.display()))?;
    load_scenario_from_reader(&mut file)
        .with_context(|| format!("시나리오 파일 파싱 실패: {}", path.display()))
}

/// Reader에서 YAML을 읽어 ScenarioFile 구조체로 파싱한다.
pub fn load_scenario_from_reader<R: Read>(reader: &mut R) -> anyhow::Result<ScenarioFile> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    let scenario: ScenarioFile = serde_yaml::from_str(&buf)?;
    scenario.validate()?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EventEmitter, ScenarioOptions, ScenarioStatus, run_scenario};
    use tokio_util::sync::CancellationToken;

    const SAMPLE: &str = r#"
name: deploy-check
tags: [smoke, deploy]
retry: 2
backoff: linear
backoff_ms: 10
vars:
  region: ap-northeast-2
steps:
  - name: remember
    kind: set_var
    key: target
    value: "svc-${region}"
  - name: probe
    kind: shell
    shell:
      command: "echo ok"
    retry: 0
    timeout_sec: 5
teardown:
  - name: cleanup
    kind: set_var
    key: cleaned
    value: "yes"
"#;

    fn parse(yaml: &str) -> ScenarioFile {
        load_scenario_from_reader(&mut yaml.as_bytes()).unwrap()
    }

    #[test]
    fn parses_steps_and_defaults() {
        let file = parse(SAMPLE);
        assert_eq!(file.name, "deploy-check");
        assert_eq!(file.timeout_sec, 60);
        assert!(matches!(file.steps[0].kind, StepKind::SetVar { .. }));
        match &file.steps[1].kind {
            StepKind::Shell { config } => {
                assert_eq!(config.script, "echo ok");
                assert_eq!(config.error_policy, ShellErrorPolicy::Fail);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn definition_resolves_step_overrides() {
        let definition = parse(SAMPLE).into_definition();
        assert_eq!(definition.tag_list(), ["deploy", "smoke"]);
        assert_eq!(definition.setup.len(), 1);
        assert_eq!(definition.teardown.len(), 1);

        let first = definition.steps[0].resolve(&definition.defaults);
        assert_eq!(first.retry.max_attempts, 3);
        assert_eq!(first.retry.backoff, Backoff::Linear);
        assert_eq!(first.retry.base_delay, Duration::from_millis(10));

        let probe = definition.steps[1].resolve(&definition.defaults);
        assert_eq!(probe.retry.max_attempts, 1);
        assert_eq!(probe.timeout, Duration::from_secs(5));
    }

    #[test]
    fn skip_flags_become_predicate() {
        let always = parse("name: a\nskip: flaky on ci\nsteps: []\n").into_definition();
        let reason = always.skip.as_ref().and_then(|p| p());
        assert_eq!(reason.as_deref(), Some("flaky on ci"));

        let env_gated = parse(
            "name: b\nskip_unless_env: SCENARIO_ENGINE_TEST_UNSET_VARIABLE\nsteps: []\n",
        )
        .into_definition();
        assert!(env_gated.skip.as_ref().and_then(|p| p()).is_some());

        let plain = parse("name: c\nsteps: []\n").into_definition();
        assert!(plain.skip.is_none());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let yaml = "name: bad\nsteps:\n  - name: x\n    kind: teleport\n";
        assert!(load_scenario_from_reader(&mut yaml.as_bytes()).is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = load_scenario_from_reader(&mut "name: a\ntimeout_sec: 0\nsteps: []\n".as_bytes())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScenarioFileError>(),
            Some(&ScenarioFileError::ZeroTimeout)
        );

        let yaml = "name: b\nsteps:\n  - name: quick\n    kind: set_var\n    key: k\n    value: v\n    timeout_sec: 0\n";
        let err = load_scenario_from_reader(&mut yaml.as_bytes()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScenarioFileError>(),
            Some(&ScenarioFileError::ZeroStepTimeout {
                step: "quick".into()
            })
        );
    }

    #[tokio::test]
    async fn vars_and_set_var_flow_through_context() {
        let yaml = r#"
name: vars
vars:
  region: eu
steps:
  - name: remember
    kind: set_var
    key: target
    value: "svc-${region}"
  - name: again
    kind: set_var
    key: copy
    value: "${target}"
"#;
        let result = run_scenario(
            parse(yaml).into_definition(),
            ScenarioOptions::default(),
            EventEmitter::disabled(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result.status, ScenarioStatus::Passed, "{:?}", result.error);
        let copied = result.steps[1]
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<String>());
        assert_eq!(copied.map(String::as_str), Some("svc-eu"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_scenario_from_file(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/scenario.yaml"));
    }
}
