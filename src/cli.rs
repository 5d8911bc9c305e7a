use crate::config::{FlowConfigOverrides, OrchestrationConfig};
use crate::event_log::get_log_summary;
use crate::flow_machine::Role;
use crate::orchestrator::Orchestrator;
use crate::persistence::{load_log, resume_orchestration};
use crate::plan::MarkdownPlanStore;
use crate::tool_executor::ToolAction;
use crate::tool_filter::{create_tool_filter, ToolDecision};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "orchestrate")]
#[command(about = "Drive a multi-step plan through coder/reviewer cycles")]
#[command(version)]
pub struct Cli {
    /// Plan file (markdown with an `active_step` frontmatter field)
    #[arg(long, global = true, default_value = "plan.md")]
    pub plan: PathBuf,

    /// Config file (default: <planDir>/.orchestration/config.yaml, then ~/.plan-orchestrator/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override flow.max_change_requests for this run
    #[arg(long, global = true)]
    pub max_change_requests: Option<u32>,

    /// Debug-level logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the resumed state without taking the lock or writing anything
    Status,
    /// Apply a ToolAction given as JSON, e.g. '{"type":"request_review"}'
    Act { action: String },
    /// Answer the pending operator prompt
    Reply { response: String },
    /// Bring the flow out of the error state
    Recover {
        #[arg(long, default_value = "operator recovery")]
        reason: String,
    },
    /// Print entry counts and elapsed time of the on-disk log
    Summary,
    /// Check whether a role may invoke a tool under the configured policy
    CheckTool {
        #[arg(long, value_enum)]
        role: CliRole,
        tool: String,
        /// Shell command, for shell tools
        #[arg(long)]
        command: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliRole {
    Coder,
    Reviewer,
}

impl From<CliRole> for Role {
    fn from(role: CliRole) -> Self {
        match role {
            CliRole::Coder => Role::Coder,
            CliRole::Reviewer => Role::Reviewer,
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<OrchestrationConfig> {
        let mut config = OrchestrationConfig::resolve(&self.plan, self.config.as_deref())?;
        config.flow = FlowConfigOverrides {
            max_change_requests: self.max_change_requests,
        }
        .apply(&config.flow);
        Ok(config)
    }
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.load_config()?;
    let plan = cli.plan.as_path();

    match cli.command {
        Command::Status => status(plan, &config),
        Command::Act { action } => {
            let action: ToolAction = serde_json::from_str(&action)
                .with_context(|| format!("Invalid action JSON: {}", action))?;
            let mut orchestrator = Orchestrator::open(plan, config)?;
            let result = orchestrator.apply(action)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(exit_code(result.success))
        }
        Command::Reply { response } => {
            let mut orchestrator = Orchestrator::open(plan, config)?;
            let result = orchestrator.reply(&response)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(exit_code(result.success))
        }
        Command::Recover { reason } => {
            let mut orchestrator = Orchestrator::open(plan, config)?;
            if orchestrator.recover(&reason)? {
                println!("Recovered: now {} at step {}", orchestrator.state(), orchestrator.active_step());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Nothing to recover: state is {}", orchestrator.state());
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Summary => {
            match load_log(plan)? {
                Some(log) => print!("{}", get_log_summary(&log)),
                None => println!("No orchestration log for {}", plan.display()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckTool {
            role,
            tool,
            command,
        } => {
            let input = command.map_or(Value::Null, |command| json!({ "command": command }));
            let filter = create_tool_filter(role.into(), config.reviewer.read_only);
            match filter.check(&tool, &input) {
                ToolDecision::Allowed => {
                    println!("allowed");
                    Ok(ExitCode::SUCCESS)
                }
                ToolDecision::Denied { reason } => {
                    println!("denied: {}", reason);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn status(plan: &Path, config: &OrchestrationConfig) -> Result<ExitCode> {
    let outcome = resume_orchestration(
        &MarkdownPlanStore,
        plan,
        &config.flow,
        FlowConfigOverrides::default(),
    )?;
    let machine = &outcome.flow_machine;

    println!("plan:            {}", plan.display());
    println!("state:           {}", machine.state());
    println!("step:            {}", machine.active_step());
    println!(
        "change requests: {}/{}",
        machine.change_request_count(),
        machine.config().max_change_requests
    );
    if let Some(prompt) = machine.user_prompt() {
        println!("pending prompt:  {}", prompt);
    }
    if outcome.is_fresh_start {
        println!("fresh start:     yes");
    }
    if let Some(error) = &outcome.error {
        println!("history discarded: {}", error);
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
