use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use starbase::{App, AppResult, AppSession};

use depscope::commands::{
    run_extension_install, run_extension_list, run_extension_load, run_extension_uninstall,
    run_extension_validate,
};
use depscope::logging;

fn print_banner() {
    use owo_colors::{OwoColorize, XtermColors};

    let teal = XtermColors::from(37);
    let amber = XtermColors::from(214);

    println!();
    println!("  {}{}", "dep".color(teal).bold(), "scope".color(amber).bold());
    println!(
        "  v{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TARGET"),
        env!("BUILD_DATE")
    );
    println!();
}

/// depscope CLI - dependency graph analysis with loadable extensions
#[derive(Parser)]
#[command(name = "depscope")]
#[command(about = "Dependency graph analysis with loadable extensions", long_about = None)]
#[command(version)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Print help
    #[arg(short, long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version
    #[arg(short = 'V', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Host configuration file (defaults to ./depscope.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Subcommand)]
enum Commands {
    /// Inspect, validate and load extensions
    Extension {
        #[command(subcommand)]
        action: ExtensionAction,
    },
}

#[derive(Clone, Subcommand)]
enum ExtensionAction {
    /// List extension packages in the extensions directory
    List {
        /// Print manifests as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check manifests and host-provided dependencies without loading
    Validate {
        /// Package directory or module file (defaults to every package)
        path: Option<PathBuf>,
    },
    /// Load extensions, report their state, then unload them
    Load {
        /// Package directory or module file (defaults to every package)
        path: Option<PathBuf>,
    },
    /// Install an extension package
    Install {
        /// Package directory or archive to install
        path: PathBuf,
    },
    /// Uninstall an extension
    Uninstall {
        /// Extension id
        id: String,
    },
}

/// Application session for the depscope CLI
#[derive(Clone)]
struct DepscopeSession {
    config: Option<PathBuf>,
    command: Commands,
}

#[async_trait::async_trait]
impl AppSession for DepscopeSession {
    async fn execute(&mut self) -> AppResult {
        let config = self.config.clone();
        match &self.command {
            Commands::Extension { action } => match action {
                ExtensionAction::List { json } => run_extension_list(config, *json).await,
                ExtensionAction::Validate { path } => {
                    run_extension_validate(config, path.clone()).await
                }
                ExtensionAction::Load { path } => run_extension_load(config, path.clone()).await,
                ExtensionAction::Install { path } => {
                    run_extension_install(config, path.clone()).await
                }
                ExtensionAction::Uninstall { id } => {
                    run_extension_uninstall(config, id.clone()).await
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> starbase::MainResult {
    // Check for help/version flags first to print our custom banner
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 1
        || args.iter().any(|a| a == "--help" || a == "-h")
        || args.iter().any(|a| a == "--version" || a == "-V")
    {
        print_banner();
    }

    let cli = Cli::parse();

    logging::init(cli.verbose).map_err(|e| miette::miette!("Failed to initialize logging: {}", e))?;

    let session = DepscopeSession {
        config: cli.config,
        command: cli.command,
    };

    let exit_code = App::default()
        .run(
            session,
            |mut session| async move { session.execute().await },
        )
        .await?;

    Ok(std::process::ExitCode::from(exit_code))
}
