use std::io::Read;
use std::path::Path;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use chain::activator::{self, ActivationOutcome};
use chain::cli::{Cli, Commands, HookCommands, SessionCommands, CatalogCommands, TelemetryCommands};
use chain::config::RuntimeConfig;
use chain::embedding::{NullEmbedder, VectorStore};
use chain::error::{format_cli_error, CoreError};
use chain::evidence::EvidenceConfig;
use chain::gate::PolicyGate;
use chain::protocol::{HookRuntime, RawPreToolInput, RawStopInput};
use chain::resolver::{self, ResolutionError};
use chain::router::{Router, RouterThresholds, RouterWeights};
use chain::session::SessionStore;
use chain::spec_loader::CatalogView;
use chain::telemetry::TelemetrySink;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let cfg = RuntimeConfig::from_cli(&cli);

    match &cli.command {
        Commands::Hook(hook) => run_hook(&cfg, hook).await,
        Commands::Activate { profile, request_id } => run_activate(&cfg, profile, request_id.clone()),
        Commands::Route => run_route(&cfg),
        Commands::Resolve { profile } => run_resolve(&cfg, profile),
        Commands::Session(cmd) => run_session(&cfg, cmd),
        Commands::Catalog(CatalogCommands::Validate) => run_catalog_validate(&cfg),
        Commands::Telemetry(TelemetryCommands::Report { limit }) => run_telemetry_report(&cfg, *limit),
        Commands::Doctor => run_doctor_command(&cfg),
    }
}

fn read_stdin() -> String {
    let mut buf = String::new();
    let _ = std::io::stdin().read_to_string(&mut buf);
    buf
}

async fn run_hook(cfg: &RuntimeConfig, hook: &HookCommands) -> i32 {
    if cfg.disable {
        return chain::protocol::EXIT_ALLOW;
    }

    match hook {
        HookCommands::PreToolUse { cwd } => {
            let raw_text = read_stdin();
            let raw: RawPreToolInput = match serde_json::from_str(&raw_text) {
                Ok(v) => v,
                Err(err) => {
                    eprintln!("[INPUT] failed to parse pre-tool-use payload: {err}");
                    return chain::protocol::EXIT_INTERNAL_ERROR;
                }
            };
            let working_dir = Path::new(cwd.as_deref().unwrap_or(raw.cwd.as_str())).to_path_buf();
            run_pre_tool_use(cfg, &working_dir, raw).await
        }
        HookCommands::Stop { cwd } => {
            let raw_text = read_stdin();
            let raw: RawStopInput = match serde_json::from_str(&raw_text) {
                Ok(v) => v,
                Err(err) => {
                    eprintln!("[INPUT] failed to parse stop payload: {err}");
                    return chain::protocol::EXIT_INTERNAL_ERROR;
                }
            };
            let working_dir = Path::new(cwd.as_deref().unwrap_or(raw.cwd.as_str())).to_path_buf();
            run_stop(cfg, &working_dir, raw).await
        }
    }
}

async fn run_pre_tool_use(
    cfg: &RuntimeConfig,
    working_dir: &Path,
    raw: RawPreToolInput,
) -> i32 {
    let skills_path = chain::session::skills_catalog_path(working_dir);
    let profiles_path = chain::session::profiles_catalog_path(working_dir);
    let catalog = match CatalogView::load(&skills_path, &profiles_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            return chain::protocol::EXIT_INTERNAL_ERROR;
        }
    };

    let store = SessionStore::new(working_dir);
    let gate = PolicyGate::new();
    let null_embedder = NullEmbedder;
    let vector_store_path = chain::session::vector_store_path(working_dir);
    let vector_store = if vector_store_path.exists() {
        VectorStore::load(&vector_store_path, None).ok()
    } else {
        None
    };
    let router = Router::new(
        &null_embedder,
        vector_store.as_ref(),
        RouterThresholds {
            immediate: cfg.immediate_threshold,
            suggestion: cfg.suggestion_threshold,
        },
        RouterWeights::default(),
    );
    let telemetry = TelemetrySink::new(cfg);
    let evidence_cfg = EvidenceConfig {
        command_timeout: std::time::Duration::from_millis(cfg.command_timeout_ms),
        ..EvidenceConfig::default()
    };

    let runtime = HookRuntime {
        store: &store,
        catalog: &catalog,
        gate: &gate,
        router: &router,
        telemetry: &telemetry,
        evidence_cfg: &evidence_cfg,
        strictness_override: cfg.strictness_override,
        disabled: cfg.disable,
    };

    let outcome = runtime.run_pre_tool_use(raw).await;
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    outcome.exit_code
}

async fn run_stop(cfg: &RuntimeConfig, working_dir: &Path, raw: RawStopInput) -> i32 {
    let skills_path = chain::session::skills_catalog_path(working_dir);
    let profiles_path = chain::session::profiles_catalog_path(working_dir);
    let catalog = match CatalogView::load(&skills_path, &profiles_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            return chain::protocol::EXIT_INTERNAL_ERROR;
        }
    };

    let store = SessionStore::new(working_dir);
    let gate = PolicyGate::new();
    let null_embedder = NullEmbedder;
    let router = Router::new(
        &null_embedder,
        None,
        RouterThresholds {
            immediate: cfg.immediate_threshold,
            suggestion: cfg.suggestion_threshold,
        },
        RouterWeights::default(),
    );
    let telemetry = TelemetrySink::new(cfg);
    let evidence_cfg = EvidenceConfig {
        command_timeout: std::time::Duration::from_millis(cfg.command_timeout_ms),
        ..EvidenceConfig::default()
    };

    let runtime = HookRuntime {
        store: &store,
        catalog: &catalog,
        gate: &gate,
        router: &router,
        telemetry: &telemetry,
        evidence_cfg: &evidence_cfg,
        strictness_override: cfg.strictness_override,
        disabled: cfg.disable,
    };

    let outcome = runtime.run_stop(raw).await;
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    outcome.exit_code
}

fn exit_code_for_core_error(err: &CoreError) -> i32 {
    match err {
        CoreError::SpecInvalid { .. }
        | CoreError::MissingProvider { .. }
        | CoreError::Conflict { .. }
        | CoreError::Cycle { .. }
        | CoreError::IdempotencyConflict { .. } => 1,
        _ => 2,
    }
}

fn run_activate(cfg: &RuntimeConfig, profile: &str, request_id: Option<String>) -> i32 {
    let catalog = match CatalogView::load(&cfg.skills_path, &cfg.profiles_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            return exit_code_for_core_error(&err);
        }
    };
    let store = SessionStore::new(&cfg.working_dir);

    match activator::activate(&store, &catalog, profile, request_id, cfg.strictness_override) {
        Ok(ActivationOutcome::Activated(result)) => {
            println!("{}", serde_json::to_string_pretty(&result_to_json(&result)).unwrap());
            0
        }
        Ok(ActivationOutcome::Conflict { existing_session_id }) => {
            eprintln!(
                "[IDEMPOTENCY_CONFLICT] an active session '{existing_session_id}' exists with a different request_id; run `chain session clear` first."
            );
            1
        }
        Ok(ActivationOutcome::Failed(err)) => {
            eprintln!("[RESOLUTION_FAILURE] {err}");
            1
        }
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            exit_code_for_core_error(&err)
        }
    }
}

fn result_to_json(result: &activator::ActivationResult) -> serde_json::Value {
    serde_json::json!({
        "activated": result.activated,
        "idempotent": result.idempotent,
        "session_id": result.session_id,
        "profile_id": result.profile_id,
        "chain": result.chain.iter().map(|s| s.0.clone()).collect::<Vec<_>>(),
        "blocked_intents": result.blocked_intents,
    })
}

fn run_route(cfg: &RuntimeConfig) -> i32 {
    let catalog = match CatalogView::load(&cfg.skills_path, &cfg.profiles_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            return exit_code_for_core_error(&err);
        }
    };

    let query = read_stdin();
    let null_embedder = NullEmbedder;
    let router = Router::new(
        &null_embedder,
        None,
        RouterThresholds {
            immediate: cfg.immediate_threshold,
            suggestion: cfg.suggestion_threshold,
        },
        RouterWeights::default(),
    );

    let decision = router.route(query.trim(), &catalog.profiles.profiles, query.trim().to_string(), 0);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "request_id": decision.request_id,
            "query": decision.query,
            "mode": format!("{:?}", decision.mode).to_lowercase(),
            "selected_profile": decision.selected_profile,
            "candidates": decision.candidates.iter().map(|c| serde_json::json!({
                "profile_name": c.profile_name,
                "score": c.score,
                "keyword_score": c.keyword_score,
                "embedding_score": c.embedding_score,
            })).collect::<Vec<_>>(),
        }))
        .unwrap()
    );
    0
}

fn run_resolve(cfg: &RuntimeConfig, profile_name: &str) -> i32 {
    let catalog = match CatalogView::load(&cfg.skills_path, &cfg.profiles_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            return exit_code_for_core_error(&err);
        }
    };

    let Some(profile) = catalog.profile(profile_name) else {
        eprintln!("[SPEC_INVALID] unknown profile '{profile_name}'");
        return 1;
    };

    match resolver::resolve(&catalog, &profile.capabilities_required) {
        Ok(result) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "chain": result.chain.iter().map(|s| s.0.clone()).collect::<Vec<_>>(),
                    "capabilities_required": result.capabilities_required,
                    "blocked_intents": result.blocked_intents,
                    "diagnostics": result.diagnostics,
                }))
                .unwrap()
            );
            0
        }
        Err(err) => {
            eprintln!("[RESOLUTION_FAILURE] {err}");
            1
        }
    }
}

fn run_session(cfg: &RuntimeConfig, cmd: &SessionCommands) -> i32 {
    let store = SessionStore::new(&cfg.working_dir);
    match cmd {
        SessionCommands::Show => match store.load_current() {
            Ok(Some(state)) => {
                println!("{}", serde_json::to_string_pretty(&state).unwrap());
                0
            }
            Ok(None) => {
                println!("no active session");
                0
            }
            Err(err) => {
                eprintln!("{}", format_cli_error(&err));
                exit_code_for_core_error(&err)
            }
        },
        SessionCommands::Clear => match store.clear_current() {
            Ok(cleared) => {
                println!("{}", if cleared { "cleared" } else { "no active session" });
                0
            }
            Err(err) => {
                eprintln!("{}", format_cli_error(&err));
                exit_code_for_core_error(&err)
            }
        },
        SessionCommands::Archive => match store.load_current() {
            Ok(Some(state)) => match store.archive(&state) {
                Ok(path) => {
                    println!("archived to {}", path.display());
                    0
                }
                Err(err) => {
                    eprintln!("{}", format_cli_error(&err));
                    exit_code_for_core_error(&err)
                }
            },
            Ok(None) => {
                println!("no active session");
                0
            }
            Err(err) => {
                eprintln!("{}", format_cli_error(&err));
                exit_code_for_core_error(&err)
            }
        },
    }
}

fn run_catalog_validate(cfg: &RuntimeConfig) -> i32 {
    match CatalogView::load(&cfg.skills_path, &cfg.profiles_path) {
        Ok(catalog) => {
            println!(
                "catalogs valid: {} skills, {} profiles",
                catalog.all_skills().len(),
                catalog.profiles.profiles.len()
            );
            0
        }
        Err(err) => {
            eprintln!("{}", format_cli_error(&err));
            exit_code_for_core_error(&err)
        }
    }
}

fn run_telemetry_report(cfg: &RuntimeConfig, limit: usize) -> i32 {
    match chain::telemetry::run_telemetry_report(&cfg.observability_log_path, limit) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("[INTERNAL] {err}");
            2
        }
    }
}

fn run_doctor_command(cfg: &RuntimeConfig) -> i32 {
    match chain::doctor::run_doctor(cfg) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("[INTERNAL] {err}");
            2
        }
    }
}
