mod builder;
mod definition;
mod file;

pub use builder::ScenarioBuilder;
pub use definition::{
    Backoff, ResourceSpec, RetryPolicy, ScenarioDefinition, SkipPredicate, StepDefinition,
    StepOptions,
};
pub use file::{
    ExtractVarFromFileConfig, ScenarioFile, ScenarioFileError, ShellConfig, ShellErrorPolicy,
    StepKind, StepSpec, load_scenario_from_file, load_scenario_from_reader,
};
