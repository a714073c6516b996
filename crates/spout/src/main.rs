//! spout - run prompt skills from the command line
//!
//! Resolves a skill, renders it with the given variables and sends it to the
//! backend serving the requested model. Skill output goes to stdout; logs
//! and diagnostics go to stderr.

mod render;

use clap::{ArgAction, Args, Parser, Subcommand};
use eyre::{bail, Result, WrapErr};
use mimalloc::MiMalloc;
use spout_core::template::placeholders;
use spout_core::{Config, ExecutionRequest, SkillRef, Variables};
use spout_engine::{ExecutionEngine, SuiteRunner};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Run prompt skills against interchangeable model backends.
#[derive(Parser)]
#[command(name = "spout")]
#[command(about = "Run prompt skills against interchangeable model backends")]
#[command(version)]
struct Cli {
    /// Config file path (applied over the user config and $SPOUT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model id (default: preferred_model from config)
    #[arg(long, short, global = true, env = "SPOUT_MODEL")]
    model: Option<String>,

    /// Increase log verbosity; repeat for debug output
    #[arg(long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a skill and print its output
    Run(RunArgs),

    /// Show the rendered prompt without calling a backend
    Show {
        category: String,

        skill: Option<String>,

        #[arg(long = "var", short = 'v', value_parser = parse_variable)]
        vars: Vec<(String, String)>,
    },

    /// List categories, or the skills of one category
    List { category: Option<String> },

    /// Run a category's test cases
    Test(TestArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Show { .. } => "show",
            Self::List { .. } => "list",
            Self::Test(_) => "test",
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Skill category, e.g. translate
    category: String,

    /// Skill name (default: skill.<category> from config, else "default")
    skill: Option<String>,

    /// Template variable as name=value; repeatable. Stdin fills `input`.
    #[arg(long = "var", short = 'v', value_parser = parse_variable)]
    vars: Vec<(String, String)>,

    /// Organization forwarded to backends that support it
    #[arg(long)]
    org: Option<String>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Report duration and token counts on stderr
    #[arg(long)]
    timer: bool,
}

#[derive(Args)]
struct TestArgs {
    category: String,

    /// Only run cases for this skill
    #[arg(long)]
    skill: Option<String>,

    /// Case file: a name inside the category's tests/ dir, or a path
    #[arg(long)]
    cases: Option<PathBuf>,

    /// Write passing outputs to tests/samples/<category>_<skill>.txt
    #[arg(long)]
    samples: bool,

    /// Write the markdown report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn parse_variable(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid variable '{s}', expected name=value")),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.name();
    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => dispatch(cli.command, cli.model, config).await,
        Err(e) => Err(eyre::Report::new(e).wrap_err("failed to load config")),
    };

    if let Err(e) = result {
        debug!(command, error = ?e, "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Command, model: Option<String>, config: Config) -> Result<()> {
    let model = model.unwrap_or_else(|| config.preferred_model.clone());
    debug!(command = command.name(), model = %model, "dispatching command");

    match command {
        Command::Run(args) => run_skill(&config, &model, args).await,
        Command::Show {
            category,
            skill,
            vars,
        } => {
            let skill = skill.unwrap_or_else(|| config.preferred_skill(&category).to_string());
            show_prompt(&config, &model, &category, &skill, vars)
        }
        Command::List { category } => list_skills(&config, category.as_deref()),
        Command::Test(args) => run_tests(&config, &model, args).await,
    }
}

/// Collect `--var` bindings, reading `input` from piped stdin when unset.
fn collect_variables(vars: Vec<(String, String)>) -> Result<Variables> {
    let mut variables: Variables = vars.into_iter().collect();
    if !variables.contains_key("input") && !std::io::stdin().is_terminal() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .wrap_err("failed to read stdin")?;
        if !input.is_empty() {
            variables.insert("input".to_string(), input.trim_end_matches('\n').to_string());
        }
    }
    Ok(variables)
}

async fn run_skill(config: &Config, model: &str, args: RunArgs) -> Result<()> {
    let skill = args
        .skill
        .unwrap_or_else(|| config.preferred_skill(&args.category).to_string());
    let variables = collect_variables(args.vars)?;
    let engine = ExecutionEngine::from_config(config);

    let mut request = ExecutionRequest::new(SkillRef::new(&args.category, &skill), model)
        .with_variables(variables);
    if let Some(org) = args.org {
        request = request.with_organization(org);
    }

    let result = engine.execute(&request).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render::print_output(&result);
    }
    if args.timer {
        render::print_timing(&result);
    }
    Ok(())
}

fn show_prompt(
    config: &Config,
    model: &str,
    category: &str,
    skill: &str,
    vars: Vec<(String, String)>,
) -> Result<()> {
    let variables = collect_variables(vars)?;
    let engine = ExecutionEngine::from_config(config);
    let prepared = engine.prepare(&SkillRef::new(category, skill), &variables)?;

    let unresolved: Vec<&str> = placeholders(&prepared.skill.template)
        .into_iter()
        .filter(|name| !prepared.variables.contains_key(*name))
        .collect();
    let backend = engine.registry().select(model).kind();

    render::print_prepared(&prepared, model, backend, &unresolved);
    Ok(())
}

fn list_skills(config: &Config, category: Option<&str>) -> Result<()> {
    let engine = ExecutionEngine::from_config(config);
    let resolver = engine.resolver();

    match category {
        Some(category) => render::print_skills(category, &resolver.list_skills(category)),
        None => {
            let categories: Vec<(String, String)> = resolver
                .list_categories()
                .into_iter()
                .map(|c| {
                    let preferred = config.preferred_skill(&c).to_string();
                    (c, preferred)
                })
                .collect();
            render::print_categories(&categories, resolver.roots());
        }
    }
    Ok(())
}

async fn run_tests(config: &Config, model: &str, args: TestArgs) -> Result<()> {
    let engine = ExecutionEngine::from_config(config);
    let mut runner = SuiteRunner::new(&engine).samples(args.samples);
    if let Some(cases) = args.cases {
        runner = runner.cases_file(cases);
    }
    let report = runner
        .run(&args.category, args.skill.as_deref(), model)
        .await?;

    render::print_suite_report(&report);
    for sample in &report.samples {
        eprintln!("Sample written to {}", sample.display());
    }
    if let Some(path) = &args.report {
        std::fs::write(path, report.to_markdown())
            .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    }

    if !report.all_passed() {
        bail!(
            "{} of {} test case(s) failed",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}
