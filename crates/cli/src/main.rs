use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use pipewright_engine::{
    DollarBraceTemplates, EngineConfig, Libraries, PipelineContext, RecordingTracker, WorkingMemory, dry_run_all, dry_run_pipe,
    execute_pipeline, load_config, load_config_from_path, needed_inputs,
};
use pipewright_types::BundleBlueprint;
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let config = match matches.get_one::<String>("config") {
        Some(path) => load_config_from_path(Path::new(path))?,
        None => load_config()?,
    };

    match matches.subcommand() {
        Some(("validate", sub)) => {
            let libraries = load_libraries(sub, &config)?;
            println!(
                "{} pipe(s) in {} domain(s) are valid",
                libraries.pipes().codes().len(),
                libraries.domains().codes().len()
            );
            Ok(())
        }
        Some(("dry-run", sub)) => run_dry_run(sub, config).await,
        Some(("needed-inputs", sub)) => {
            let libraries = load_libraries(sub, &config)?;
            let pipe_code = required_pipe(sub)?;
            let pipe = libraries.pipes().get_required(pipe_code, pipe_code)?;
            for requirement in needed_inputs(&libraries, &DollarBraceTemplates, &pipe)?.iter() {
                println!("{}: {} ({})", requirement.variable_name, requirement.concept, requirement.multiplicity);
            }
            Ok(())
        }
        Some(("run", sub)) => run_pipeline(sub, config).await,
        _ => {
            println!("Available subcommands: validate, dry-run, needed-inputs, run");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .try_init();
}

fn build_cli() -> Command {
    let bundles = Arg::new("bundles")
        .required(true)
        .num_args(1..)
        .action(ArgAction::Append)
        .help("Bundle files (YAML or JSON)");
    let pipe = Arg::new("pipe").long("pipe").short('p').action(ArgAction::Set).help("Pipe code");

    Command::new("pipewright")
        .about("Validate and run pipe bundles")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .action(ArgAction::Set)
                .help("Engine configuration file"),
        )
        .subcommand(Command::new("validate").about("Load bundles and run static validation").arg(bundles.clone()))
        .subcommand(
            Command::new("dry-run")
                .about("Dry-run one pipe, or every pipe of the bundles")
                .arg(bundles.clone())
                .arg(pipe.clone()),
        )
        .subcommand(
            Command::new("needed-inputs")
                .about("List the inputs a pipe needs")
                .arg(bundles.clone())
                .arg(pipe.clone().required(true)),
        )
        .subcommand(
            Command::new("run")
                .about("Run a pipe against JSON inputs")
                .arg(bundles)
                .arg(pipe.required(true))
                .arg(
                    Arg::new("inputs")
                        .long("inputs")
                        .short('i')
                        .action(ArgAction::Set)
                        .help("JSON file of { name: { concept, content } } inputs"),
                ),
        )
}

/// Parses a bundle file. JSON is read through the YAML parser.
fn load_bundle_file(path: &Path) -> Result<BundleBlueprint> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read bundle file: {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse bundle file: {}", path.display()))
}

fn load_libraries(matches: &ArgMatches, config: &EngineConfig) -> Result<Libraries> {
    let mut libraries = Libraries::new();
    for path in matches.get_many::<String>("bundles").into_iter().flatten() {
        let path = PathBuf::from(path);
        let bundle = load_bundle_file(&path)?;
        libraries
            .load_bundle(&bundle, &DollarBraceTemplates, &config.validation)
            .with_context(|| format!("Failed to load bundle: {}", path.display()))?;
    }
    Ok(libraries)
}

fn required_pipe(matches: &ArgMatches) -> Result<&str> {
    matches
        .get_one::<String>("pipe")
        .map(String::as_str)
        .context("a --pipe code is required")
}

async fn run_dry_run(matches: &ArgMatches, config: EngineConfig) -> Result<()> {
    let libraries = load_libraries(matches, &config)?;
    let tracker = Arc::new(RecordingTracker::new());
    let ctx = Arc::new(PipelineContext::new(libraries).with_config(config).with_tracker(tracker.clone()));

    if let Some(pipe_code) = matches.get_one::<String>("pipe") {
        let output = dry_run_pipe(ctx, pipe_code).await?;
        println!("{}", serde_json::to_string_pretty(&output.main_stuff()?.content.to_json())?);
        info!(events = tracker.events().len(), "dry run recorded tracker events");
        return Ok(());
    }

    let report = dry_run_all(ctx).await;
    for pipe_code in &report.succeeded {
        println!("ok      {pipe_code}");
    }
    for failure in &report.failures {
        println!("failed  {}: {}", failure.pipe_code, failure.error);
    }
    if !report.is_success() {
        bail!("{} pipe(s) failed their dry run", report.failures.len());
    }
    Ok(())
}

async fn run_pipeline(matches: &ArgMatches, config: EngineConfig) -> Result<()> {
    let libraries = load_libraries(matches, &config)?;
    let pipe_code = required_pipe(matches)?;
    let domain = libraries.pipes().get(pipe_code).map(|pipe| pipe.domain.clone());
    let memory = match matches.get_one::<String>("inputs") {
        Some(path) => {
            let content = fs::read_to_string(path).with_context(|| format!("Failed to read inputs file: {path}"))?;
            let inputs: serde_json::Value = serde_json::from_str(&content).with_context(|| format!("Failed to parse inputs file: {path}"))?;
            WorkingMemory::from_json_inputs(libraries.concepts(), domain.as_deref(), &inputs)?
        }
        None => WorkingMemory::new(),
    };

    let ctx = Arc::new(PipelineContext::new(libraries).with_config(config));
    let output = execute_pipeline(ctx, pipe_code, memory).await?;
    println!("{}", serde_json::to_string_pretty(&output.main_stuff()?.content.to_json())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_and_json_bundles() {
        let temp_dir = tempfile::tempdir().unwrap();
        let yaml_path = temp_dir.path().join("bundle.yaml");
        fs::write(
            &yaml_path,
            r#"
domain: greetings
pipe:
  greet:
    type: PipeCompose
    description: Greet someone
    inputs:
      name: Text
    output: Text
    template: "Hello ${{ name }}"
"#,
        )
        .unwrap();
        let json_path = temp_dir.path().join("bundle.json");
        fs::write(&json_path, r#"{"domain": "empty"}"#).unwrap();

        let bundle = load_bundle_file(&yaml_path).expect("yaml bundle");
        assert_eq!(bundle.domain, "greetings");
        assert!(bundle.pipe.contains_key("greet"));
        assert_eq!(load_bundle_file(&json_path).expect("json bundle").domain, "empty");
    }

    #[test]
    fn cli_requires_a_pipe_for_needed_inputs() {
        let result = build_cli().try_get_matches_from(["pipewright", "needed-inputs", "bundle.yaml"]);
        assert!(result.is_err());
        let matches = build_cli()
            .try_get_matches_from(["pipewright", "dry-run", "a.yaml", "b.yaml", "--pipe", "greet"])
            .expect("dry-run arguments");
        let (_, sub) = matches.subcommand().expect("subcommand");
        assert_eq!(sub.get_many::<String>("bundles").map(|values| values.count()), Some(2));
    }
}
