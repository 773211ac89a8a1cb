use crate::engine::{RunOptions, ScenarioOptions, TeardownPolicy};
use crate::reporter::ReporterKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 실행 설정 검증 오류이다.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrency는 1 이상이어야 합니다.")]
    ZeroConcurrency,
    #[error("{field}는 0보다 커야 합니다.")]
    ZeroDuration { field: &'static str },
}

/// 실행 설정 파일 구조이다. 모든 필드는 생략할 수 있다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 동시에 실행할 시나리오 수.
    pub max_concurrency: usize,
    /// 실패 허용 한도. 0이면 제한 없음.
    pub max_failures: usize,
    /// 전체 실행 제한 시간(초 단위).
    pub deadline_secs: Option<u64>,
    pub teardown_policy: TeardownPolicy,
    /// teardown 콜백당 허용 시간(초 단위).
    pub teardown_timeout_secs: Option<u64>,
    pub reporter: ReporterKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_failures: 0,
            deadline_secs: None,
            teardown_policy: TeardownPolicy::default(),
            teardown_timeout_secs: None,
            reporter: ReporterKind::default(),
        }
    }
}

impl RunConfig {
    /// YAML 파일을 읽어 설정을 만든다.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("설정 파일을 열 수 없습니다: {}", path.display()))?;
        Self::load_from_reader(&mut file)
            .with_context(|| format!("설정 파일 파싱 실패: {}", path.display()))
    }

    pub fn load_from_reader<R: Read>(reader: &mut R) -> anyhow::Result<Self> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        if buf.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: RunConfig = serde_yaml::from_str(&buf)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.deadline_secs == Some(0) {
            return Err(ConfigError::ZeroDuration {
                field: "deadline_secs",
            });
        }
        if self.teardown_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroDuration {
                field: "teardown_timeout_secs",
            });
        }
        Ok(())
    }

    /// 스케줄러 옵션으로 변환한다.
    pub fn to_run_options(&self, cancel: CancellationToken) -> RunOptions {
        RunOptions {
            max_concurrency: self.max_concurrency,
            max_failures: self.max_failures,
            deadline: self.deadline_secs.map(Duration::from_secs),
            cancel,
            scenario: ScenarioOptions {
                teardown_policy: self.teardown_policy,
                teardown_timeout: self.teardown_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_uses_defaults() {
        let yaml = "max_concurrency: 4\nteardown_policy: fail_scenario\nreporter: tap\n";
        let config = RunConfig::load_from_reader(&mut yaml.as_bytes()).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_failures, 0);
        assert_eq!(config.teardown_policy, TeardownPolicy::FailScenario);
        assert_eq!(config.reporter, ReporterKind::Tap);

        let options = config.to_run_options(CancellationToken::new());
        assert_eq!(options.max_concurrency, 4);
        assert!(options.deadline.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let config = RunConfig::load_from_reader(&mut "".as_bytes()).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = RunConfig::load_from_reader(&mut "max_concurrency: 0".as_bytes()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroConcurrency)
        );
    }

    #[test]
    fn loads_from_file_with_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deadline_secs: 30\nteardown_timeout_secs: 5").unwrap();

        let config = RunConfig::load_from_file(file.path()).unwrap();
        let options = config.to_run_options(CancellationToken::new());
        assert_eq!(options.deadline, Some(Duration::from_secs(30)));
        assert_eq!(options.scenario.teardown_timeout, Some(Duration::from_secs(5)));
    }
}
