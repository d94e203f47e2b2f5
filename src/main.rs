use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use log::debug;

use xschema::config::RunnerConfig;
use xschema::hierarchy::IncludeHierarchy;
use xschema::net::io::read_document;
use xschema::options::Options;
use xschema::runner::{FiringWriter, HandlerRegistry, JsonParameters, Runner};

fn main() -> ExitCode {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let mut flags = std::env::args().skip(1).collect::<Vec<_>>();
    if let Ok(extra) = std::env::var("PN_FLAGS") {
        match shellwords::split(&extra) {
            Ok(extra) => flags.extend(extra),
            Err(err) => log::warn!("ignoring PN_FLAGS: {}", err),
        }
    }

    let options = match Options::parse_from_args(&flags) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    debug!("options: {:?}", options);

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options) -> Result<()> {
    let mut config = RunnerConfig::load_from_file(&options.config)?;
    if options.seed.is_some() {
        config.seed = options.seed;
    }
    if options.limit.is_some() {
        config.firing_limit = options.limit;
    }

    let mut hierarchy: IncludeHierarchy = read_document(&options.net)
        .with_context(|| format!("Failed to load net: {}", options.net))?;
    let mut runner = Runner::from_hierarchy(&mut hierarchy)?;
    runner.apply_config(&config, &HandlerRegistry::default())?;
    for mark in &options.marks {
        runner.mark_place(&mark.place, &mark.color, mark.count)?;
    }
    if let Some(path) = &options.parameters {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters: {}", path))?;
        runner.load_parameters(&JsonParameters::parse(&text)?)?;
    }

    let writer = FiringWriter::create(&options.output)
        .with_context(|| format!("Failed to create report: {}", options.output))?
        .quoted(config.quoted_report);
    runner.add_observer(writer);

    let outcome = runner.run()?;
    println!(
        "{:?} after {} rounds (seed {}), report written to {}",
        outcome.reason,
        outcome.rounds,
        runner.seed().unwrap_or_default(),
        options.output
    );
    Ok(())
}
