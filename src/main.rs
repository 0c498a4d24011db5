use clap::{Parser, Subcommand};
use cliclack::{intro, log, outro, outro_cancel};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use supafn::api::HttpFunctionsApi;
use supafn::config::{self, DeploySettings, ToolchainSettings};
use supafn::deploy::{BatchOverrides, DeployedFunction, Deployer, UpsertAction};
use supafn::fs::{FileSystem, OsFs};
use supafn::toolchain::Installer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "supafn",
    version,
    about = "Deploy Edge Functions to a Supabase project"
)]
struct Cli {
    /// Management API access token (falls back to ~/.supabase/access-token)
    #[arg(long, env = "SUPABASE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Management API host
    #[arg(long, env = "SUPABASE_API_HOST", default_value = config::DEFAULT_API_HOST, global = true)]
    api_host: String,

    /// Output debug logs to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage Edge Functions
    Functions {
        #[command(subcommand)]
        action: FunctionsAction,
    },
}

#[derive(Subcommand)]
enum FunctionsAction {
    /// Deploy one or more Functions (all of supabase/functions if none given)
    Deploy {
        /// Function names to deploy, in order
        slugs: Vec<String>,

        /// Project ref of the Supabase project (falls back to supabase/.temp/project-ref)
        #[arg(long, env = "SUPABASE_PROJECT_ID")]
        project_ref: Option<String>,

        /// Path to import map file
        #[arg(long)]
        import_map: Option<PathBuf>,

        /// Disable JWT verification for the Functions
        #[arg(long, conflicts_with = "verify_jwt")]
        no_verify_jwt: bool,

        /// Explicitly enable or disable JWT verification (overrides config.toml)
        #[arg(long)]
        verify_jwt: Option<bool>,

        /// Project directory containing supabase/ (default: current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Location of the deno executable (installed there if missing)
        #[arg(long, env = "SUPABASE_DENO_PATH")]
        deno_path: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider BEFORE tokio runtime starts
    // (required for rustls 0.23+ - must happen before any TLS operations)
    #[cfg(feature = "rustls")]
    {
        rustls_crate::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| "Failed to install rustls crypto provider")?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

fn report_deployed(function: &DeployedFunction, project_ref: &str) -> std::io::Result<()> {
    let verb = match function.action {
        UpsertAction::Create => "Created",
        UpsertAction::Update { .. } => "Updated",
    };
    log::success(format!(
        "{} Function {} on project {}",
        verb, function.slug, project_ref
    ))
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Functions { action } => match action {
            FunctionsAction::Deploy {
                slugs,
                project_ref,
                import_map,
                no_verify_jwt,
                verify_jwt,
                workdir,
                deno_path,
            } => {
                let workdir = match workdir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
                let project_ref = config::resolve_project_ref(fs.as_ref(), &workdir, project_ref)?;
                let token = config::resolve_access_token(
                    fs.as_ref(),
                    &config::access_token_path(),
                    cli.access_token,
                )?;

                let mut toolchain = ToolchainSettings::default();
                if let Some(path) = deno_path {
                    toolchain.deno_path = path;
                }
                let installer = Installer::new(toolchain);
                let api = Arc::new(HttpFunctionsApi::new(cli.api_host, token));
                let deployer = Deployer::new(fs, api, DeploySettings::new(workdir));

                let overrides = BatchOverrides {
                    verify_jwt: if no_verify_jwt { Some(false) } else { verify_jwt },
                    import_map_path: import_map,
                };

                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });

                intro("supafn functions deploy")?;
                log::step(format!("Deploying to project {}", project_ref))?;

                match deployer
                    .run(&installer, slugs, &project_ref, &overrides, &cancel)
                    .await
                {
                    Ok(deployed) => {
                        for function in &deployed {
                            report_deployed(function, &project_ref)?;
                        }
                        outro(format!(
                            "You can inspect your deployment in the Dashboard: https://supabase.com/dashboard/project/{}/functions",
                            project_ref
                        ))?;
                    }
                    Err(e) => {
                        for function in e.deployed_before_failure() {
                            report_deployed(function, &project_ref)?;
                        }
                        let summary = match e.failed_slug() {
                            Some(slug) => format!("Failed to deploy Function {}.", slug),
                            None => "Deployment failed.".to_string(),
                        };
                        let _ = outro_cancel(summary);
                        return Err(e.into());
                    }
                }
            }
        },
    }

    Ok(())
}
