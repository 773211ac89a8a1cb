//! YAML 시나리오에서 사용하는 내장 Step 액션이다.

mod extract;
mod set;
mod shell;

pub use extract::ExtractAction;
pub use set::SetVarAction;
pub use shell::ShellAction;

use crate::action::SharedAction;
use crate::scenario::StepKind;
use std::sync::Arc;

/// StepKind에 대응하는 액션을 생성한다.
pub fn action_for(step_name: &str, kind: &StepKind) -> SharedAction {
    match kind {
        StepKind::Shell { config } => Arc::new(ShellAction::new(step_name, config.clone())),
        StepKind::ExtractVarFromFile { config } => {
            Arc::new(ExtractAction::new(step_name, config.clone()))
        }
        StepKind::SetVar { key, value } => Arc::new(SetVarAction::new(key, value)),
    }
}
