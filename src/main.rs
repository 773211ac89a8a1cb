use anyhow::Context;
use clap::Parser;
use scenario_engine::config::RunConfig;
use scenario_engine::engine::Scheduler;
use scenario_engine::reporter::{ReporterKind, drive_reporters};
use scenario_engine::scenario::load_scenario_from_file;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// YAML 시나리오를 실행하고 결과를 보고한다.
#[derive(Debug, Parser)]
#[command(name = "scenario-engine", version)]
struct Cli {
    /// 실행할 시나리오 파일 경로.
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,
    /// 실행 설정 파일(YAML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// 동시에 실행할 시나리오 수. 설정 파일 값을 덮어쓴다.
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,
    /// 실패 허용 한도. 0이면 제한 없음.
    #[arg(long)]
    max_failures: Option<usize>,
    /// 출력 형식.
    #[arg(long, value_enum)]
    reporter: Option<ReporterKind>,
    /// 이 태그 중 하나를 가진 시나리오만 실행한다.
    #[arg(long = "tag")]
    tags: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("오류: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// 시나리오를 실행하고 실패가 없으면 true를 반환한다.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load_from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(max_failures) = cli.max_failures {
        config.max_failures = max_failures;
    }
    if let Some(reporter) = cli.reporter {
        config.reporter = reporter;
    }
    config.validate()?;

    let mut scenarios = Vec::with_capacity(cli.scenarios.len());
    for path in &cli.scenarios {
        let definition = load_scenario_from_file(path)?.into_definition();
        if !cli.tags.is_empty() && !definition.has_any_tag(&cli.tags) {
            info!(scenario = %definition.name, "태그 필터로 제외");
            continue;
        }
        scenarios.push(definition);
    }

    let runtime = Runtime::new().context("Tokio 런타임 생성 실패")?;
    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("중단 신호 수신, 실행을 취소합니다.");
                interrupt.cancel();
            }
        });

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let reporters = vec![config.reporter.build(std::io::stdout())];
        let sink = tokio::spawn(drive_reporters(rx, reporters));

        let scheduler = Scheduler::new(config.to_run_options(cancel)).with_events(tx);
        let report = scheduler.run(scenarios).await;
        drop(scheduler);
        if let Err(err) = sink.await {
            warn!(error = %err, "리포터 태스크 비정상 종료");
        }
        report
    });
    Ok(!report.has_failures())
}
