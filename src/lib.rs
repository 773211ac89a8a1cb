//! 시나리오 실행 엔진.
//!
//! 이름 붙은 Step의 순차 실행, 재시도와 제한 시간, 시나리오 단위 리소스
//! 수명 관리, 시나리오 간 동시성 제어와 라이프사이클 이벤트 송신을 제공한다.

pub mod action;
pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod reporter;
pub mod scenario;

pub use action::{StepValue, unit, value};
pub use engine::{RunOptions, RunReport, Scheduler, run_scenarios};
pub use error::{EngineError, SkipSignal, StepError};
pub use scenario::{RetryPolicy, ScenarioDefinition, StepDefinition};
