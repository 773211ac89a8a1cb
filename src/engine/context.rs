use crate::action::StepValue;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;

/// 시나리오 실행 한 번에 대응하는 가변 상태이다.
///
/// 실행마다 새로 생성되며 실행이 끝나면 버려진다. 서로 다른 실행 사이에 상태가
/// 공유되지 않는다.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    /// 키-값 저장소.
    store: HashMap<String, Box<dyn Any + Send + Sync>>,
    /// 시작된 Step마다 하나씩 추가되는 결과 슬롯. 통과한 Step만 값을 가진다.
    results: Vec<Option<StepValue>>,
    /// 이름별 리소스 인스턴스.
    resources: HashMap<String, StepValue>,
    /// 현재 실행 중인 Step 인덱스.
    current_index: Option<usize>,
    /// 마지막 슬롯의 Step이 아직 실행 중인지 여부.
    in_step: bool,
}

impl ExecutionContext {
    /// 비어 있는 실행 컨텍스트를 생성한다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장소에 값을 설정한다. 같은 키의 기존 값은 교체된다.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// 저장소 값을 타입 검사 후 조회한다.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.store.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// 저장소 값을 타입 검사 후 가변 참조로 조회한다.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.store.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// 저장소 값을 제거한다.
    pub fn remove(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    /// 문자열로 표현 가능한 저장소 값을 반환한다.
    ///
    /// `String`, `&'static str`, 정수, 실수, bool 값을 지원한다.
    pub fn get_display(&self, key: &str) -> Option<String> {
        let value = self.store.get(key)?;
        if let Some(v) = value.downcast_ref::<String>() {
            return Some(v.clone());
        }
        if let Some(v) = value.downcast_ref::<&'static str>() {
            return Some((*v).to_string());
        }
        if let Some(v) = value.downcast_ref::<i64>() {
            return Some(v.to_string());
        }
        if let Some(v) = value.downcast_ref::<u64>() {
            return Some(v.to_string());
        }
        if let Some(v) = value.downcast_ref::<i32>() {
            return Some(v.to_string());
        }
        if let Some(v) = value.downcast_ref::<f64>() {
            return Some(v.to_string());
        }
        if let Some(v) = value.downcast_ref::<bool>() {
            return Some(v.to_string());
        }
        None
    }

    /// 컨텍스트 또는 환경 변수에서 값을 조회한다.
    pub fn get_or_env(&self, key: &str) -> Option<String> {
        if let Some(value) = self.get_display(key) {
            return Some(value);
        }
        std::env::var(key).ok()
    }

    /// 시작된 Step 수와 같은 결과 슬롯 수.
    pub fn results_len(&self) -> usize {
        self.results.len()
    }

    /// `index`번째 Step의 값을 타입 검사 후 조회한다.
    pub fn result<T: Any>(&self, index: usize) -> Option<&T> {
        self.results
            .get(index)
            .and_then(|slot| slot.as_ref())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// 직전에 끝난 Step의 값을 타입 검사 없이 반환한다.
    pub fn previous_value(&self) -> Option<StepValue> {
        let finished = if self.in_step {
            self.results.len().checked_sub(1)?
        } else {
            self.results.len()
        };
        let last = finished.checked_sub(1)?;
        self.results.get(last).cloned().flatten()
    }

    /// 직전 Step의 출력 값을 `T`로 꺼낸다.
    ///
    /// Step N은 Step N-1이 선언한 출력 타입으로 호출해야 한다. 타입이 다르거나
    /// 직전 Step이 통과하지 못했으면 `None`이다.
    pub fn previous<T: Any>(&self) -> Option<&T> {
        let finished = if self.in_step {
            self.results.len().checked_sub(1)?
        } else {
            self.results.len()
        };
        let last = finished.checked_sub(1)?;
        self.result::<T>(last)
    }

    /// 리소스 인스턴스를 타입 검사 후 조회한다.
    pub fn resource<T: Any>(&self, name: &str) -> Option<&T> {
        self.resources.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// 리소스 인스턴스를 공유 포인터로 반환한다.
    pub fn resource_value(&self, name: &str) -> Option<StepValue> {
        self.resources.get(name).cloned()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub(crate) fn register_resource(&mut self, name: impl Into<String>, instance: StepValue) {
        self.resources.insert(name.into(), instance);
    }

    /// Step 시작을 기록한다. 결과 슬롯이 하나 추가된다.
    pub(crate) fn begin_step(&mut self, index: usize) {
        self.current_index = Some(index);
        self.results.push(None);
        self.in_step = true;
    }

    /// 실행 중인 Step의 결과를 기록한다.
    pub(crate) fn finish_step(&mut self, value: Option<StepValue>) {
        if let Some(slot) = self.results.last_mut() {
            *slot = value;
        }
        self.in_step = false;
    }

    /// `${VAR}` 패턴을 실제 값으로 치환한다.
    ///
    /// 컨텍스트 저장소를 먼저 찾고 없으면 환경 변수를 사용한다. 치환되지 않은
    /// 플레이스홀더가 남으면 오류를 반환한다.
    pub fn expand_placeholders(&self, template: &str) -> anyhow::Result<String> {
        static PLACEHOLDER: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("정규식 컴파일 실패"));
        let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            self.get_or_env(key)
                .unwrap_or_else(|| format!("${{{key}}}"))
        });
        let result = result.to_string();
        if let Some(caps) = PLACEHOLDER.captures(&result) {
            anyhow::bail!("플레이스홀더 치환 실패: {}", &caps[0]);
        }
        Ok(result)
    }

    /// `template` 문자열을 치환하되 실패 시 필드 이름을 포함한 오류를 반환한다.
    pub fn expand_required(&self, template: &str, field: &str) -> anyhow::Result<String> {
        self.expand_placeholders(template)
            .with_context(|| format!("{field} 필드의 플레이스홀더를 치환할 수 없습니다."))
    }
}

/// ExecutionContext를 비동기 환경에서 공유하기 위한 타입 별칭이다.
pub type SharedExecutionContext = std::sync::Arc<tokio::sync::RwLock<ExecutionContext>>;

/// 새 실행 컨텍스트를 공유 포인터로 생성한다.
pub fn new_shared_context() -> SharedExecutionContext {
    std::sync::Arc::new(tokio::sync::RwLock::new(ExecutionContext::new()))
}
