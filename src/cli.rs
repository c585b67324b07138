use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrictnessArg {
    Strict,
    Advisory,
    Permissive,
}

impl From<StrictnessArg> for crate::model::Strictness {
    fn from(value: StrictnessArg) -> Self {
        match value {
            StrictnessArg::Strict => crate::model::Strictness::Strict,
            StrictnessArg::Advisory => crate::model::Strictness::Advisory,
            StrictnessArg::Permissive => crate::model::Strictness::Permissive,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum HookCommands {
    #[command(about = "Gate a pending tool invocation; reads {tool, input, cwd, prompt?} from stdin")]
    PreToolUse {
        #[arg(long)]
        cwd: Option<String>,
    },
    #[command(about = "Run the completion gate on a session-stop signal; reads {cwd} from stdin")]
    Stop {
        #[arg(long)]
        cwd: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommands {
    #[command(about = "Print the current session state as JSON")]
    Show,
    #[command(about = "Discard the current session without archiving it")]
    Clear,
    #[command(about = "Move the current session into the archive without requiring completion")]
    Archive,
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommands {
    #[command(about = "Load and validate both catalogs without activating anything")]
    Validate,
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize the observability log (event counts, unique runs)")]
    Report {
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
}

pub const CLI_EXAMPLES: &str = r#"EXAMPLES:
  chain catalog validate
  chain activate --profile bug-fix --request-id req-1
  echo '{"tool":"Write","input":{"file_path":"src/login.ts"},"cwd":"."}' | chain hook pre-tool-use
  echo '{"cwd":"."}' | chain hook stop
  echo "fix the login bug" | chain route
  chain resolve --profile bug-fix
  chain session show
  chain telemetry report --limit 100
  chain doctor
"#;

#[derive(Debug, Parser)]
#[command(
    name = "chain",
    version,
    about = "Workflow enforcement core: gates tool use against declarative skill/profile policies",
    after_help = CLI_EXAMPLES
)]
pub struct Cli {
    /// Working directory the catalogs and session file are resolved against.
    #[arg(long, global = true, env = "CHAIN_CWD", default_value = ".")]
    pub cwd: String,

    /// Overrides every profile's strictness for the duration of this invocation.
    #[arg(long, global = true, env = "CHAIN_STRICTNESS_OVERRIDE")]
    pub strictness_override: Option<StrictnessArg>,

    /// Router score at or above which a profile is activated immediately.
    #[arg(long, global = true, env = "CHAIN_IMMEDIATE_THRESHOLD", default_value_t = 0.85)]
    pub immediate_threshold: f32,

    /// Router score at or above which a profile is merely suggested.
    #[arg(long, global = true, env = "CHAIN_SUGGESTION_THRESHOLD", default_value_t = 0.70)]
    pub suggestion_threshold: f32,

    /// Per-command timeout for `command_success` evidence, in milliseconds.
    #[arg(long, global = true, env = "CHAIN_COMMAND_TIMEOUT_MS", default_value_t = 30_000)]
    pub command_timeout_ms: u64,

    /// When set, every hook invocation allows unconditionally and writes no state.
    #[arg(long, global = true, env = "CHAIN_DISABLE")]
    pub disable: bool,

    /// Render error/config output without redacting path-like values.
    #[arg(long, global = true)]
    pub show_sensitive_config: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(subcommand, about = "Hook entry points the host drives the gate through")]
    Hook(HookCommands),

    #[command(about = "Activate a profile, idempotent on --request-id")]
    Activate {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        request_id: Option<String>,
    },

    #[command(about = "Score a free-text prompt (read from stdin) against every profile")]
    Route,

    #[command(about = "Resolve a profile's capability chain without creating a session")]
    Resolve {
        #[arg(long)]
        profile: String,
    },

    #[command(subcommand, about = "Inspect or clear the current session")]
    Session(SessionCommands),

    #[command(subcommand, about = "Validate the skills/profiles catalogs")]
    Catalog(CatalogCommands),

    #[command(subcommand, about = "Inspect the observability log")]
    Telemetry(TelemetryCommands),

    #[command(about = "Check catalog files, session file, and environment without mutating anything")]
    Doctor,
}
