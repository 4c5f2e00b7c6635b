use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "offloadctl", version, about = "Submit tasks to an offload queue and follow them")]
pub struct Cli {
    /// YAML config file (default: ~/.offloadctl/config.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Queue server URL, overriding the config file and OFFLOAD_SERVER_URL
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// API key, overriding the config file and OFFLOAD_API_KEY
    #[arg(long = "api-key", global = true, value_name = "KEY")]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a shell command on a remote agent and wait for its output
    Submit(SubmitArgs),
    /// Send a prompt to a remote model
    Prompt(PromptArgs),
    /// Submit a raw JSON payload under any capability
    Run(RunArgs),
    /// List capabilities served by online agents
    Capabilities,
    /// Show recent commands and issued task ids
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Shell capability to submit under
    #[arg(long, default_value = offload_core::template::SHELL_CAPABILITY)]
    pub capability: String,

    /// Print the task id and exit instead of polling
    #[arg(long, default_value_t = false)]
    pub detach: bool,

    /// The command line, run under `bash -c`
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PromptArgs {
    /// Model name, with or without the `LLM::` prefix
    #[arg(long, short)]
    pub model: String,

    /// Wait on the blocking endpoint instead of polling
    #[arg(long, default_value_t = false)]
    pub blocking: bool,

    #[arg(required = true, trailing_var_arg = true, value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Capability, e.g. `debug::echo`
    pub capability: String,

    /// Payload; sent as a JSON string if it does not parse as JSON
    pub payload: String,

    /// Wait on the blocking endpoint instead of polling
    #[arg(long, default_value_t = false)]
    pub blocking: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only show commands starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Also list issued task ids
    #[arg(long, default_value_t = false)]
    pub tasks: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() {
        let cli = Cli::parse_from(["offloadctl", "--server", "http://q", "submit", "echo", "hi"]);
        assert_eq!(cli.server.as_deref(), Some("http://q"));
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.command.join(" "), "echo hi");
        assert_eq!(args.capability, "shell::bash");
        assert!(!args.detach);
    }

    #[test]
    fn test_parse_prompt_and_run() {
        let cli = Cli::parse_from(["offloadctl", "prompt", "-m", "qwen", "--blocking", "hello", "there"]);
        let Command::Prompt(args) = cli.command else {
            panic!("expected prompt");
        };
        assert!(args.blocking);
        assert_eq!(args.model, "qwen");
        assert_eq!(args.prompt.join(" "), "hello there");

        let cli = Cli::parse_from(["offloadctl", "run", "debug::echo", "{\"a\":1}", "--api-key", "k"]);
        assert_eq!(cli.api_key.as_deref(), Some("k"));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.capability, "debug::echo");
        assert!(!args.blocking);
    }

    #[test]
    fn test_submit_requires_command() {
        assert!(Cli::try_parse_from(["offloadctl", "submit"]).is_err());
    }
}
