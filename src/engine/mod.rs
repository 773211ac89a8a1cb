mod context;
mod events;
mod resources;
mod runner;
mod scheduler;
mod state;
mod step;

pub use context::{ExecutionContext, SharedExecutionContext, new_shared_context};
pub use events::{EngineEvent, EventEmitter};
pub use resources::ResourceManager;
pub use runner::{ScenarioOptions, TeardownPolicy, run_scenario};
pub use scheduler::{RunOptions, RunReport, Scheduler, run_scenarios};
pub use state::{
    ScenarioMachine, ScenarioPhase, ScenarioResult, ScenarioStatus, StepResult, StepStatus,
    Summary,
};
pub use step::StepExecutor;
