//! stack-deps - Install dependencies for an existing project

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use scaffolder_core::pm::{
    CommandRunner, InstallTarget, PmSession, PreferenceStore, SystemRunner, VerifyOptions,
};
use scaffolder_core::project;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "stack-deps")]
#[command(about = "Install dependencies for the root, client and server of a project")]
#[command(version)]
pub struct Args {
    /// Only install the project root
    #[arg(long = "root-only", visible_alias = "root", conflicts_with = "all")]
    pub root_only: bool,

    /// Install the root, client and server (default)
    #[arg(long)]
    pub all: bool,

    /// Package manager to use instead of the detected one
    #[arg(long = "pm", visible_alias = "package-manager", value_name = "NAME")]
    pub package_manager: Option<String>,

    /// Project directory
    #[arg(short = 'C', long = "dir", default_value = ".")]
    pub dir: PathBuf,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Install targets selected by the flags
fn select_targets(project_dir: &Path, root_only: bool) -> Vec<InstallTarget> {
    let mut targets = project::default_install_targets(project_dir);
    if root_only {
        targets.retain(InstallTarget::is_root);
    }
    targets
}

async fn install_all<R: CommandRunner>(
    session: &mut PmSession<R>,
    manager: &str,
    targets: &[InstallTarget],
) -> Result<usize> {
    let mut failures = 0;

    for target in targets {
        println!(
            "{} {} ({})",
            "->".blue(),
            target.name.bold(),
            target.path.display()
        );

        match session
            .install(manager, std::slice::from_ref(target), true)
            .await
        {
            Ok(outcome) => {
                if let Some(from) = outcome.fallback_from {
                    println!(
                        "   {} {} failed, used {} instead",
                        "warning:".yellow(),
                        from,
                        outcome.manager
                    );
                }
                let verification = session
                    .verify(
                        outcome.manager,
                        std::slice::from_ref(target),
                        &VerifyOptions::default(),
                    )
                    .await?;
                let summary = session.summarize(&outcome, &verification)?;
                if !summary.success {
                    failures += 1;
                }
                for line in summary.to_string().lines() {
                    println!("   {}", line);
                }
            }
            Err(e) => {
                failures += 1;
                println!("   {} {}", "error:".red(), e);
            }
        }
    }

    Ok(failures)
}

async fn run(args: Args) -> Result<ExitCode> {
    let project_dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("Project directory not found: {}", args.dir.display()))?;

    let mut session = PmSession::new(SystemRunner::new(), PreferenceStore::default_location());
    session.validate();

    if let Some(name) = &args.package_manager {
        session.descriptor(name)?;
    }

    let targets = select_targets(&project_dir, args.root_only);
    if targets.is_empty() {
        anyhow::bail!("No package.json found in {}", project_dir.display());
    }

    let resolution = session
        .resolve_manager(&project_dir, args.package_manager.as_deref())
        .await;
    debug!(manager = resolution.manager, source = ?resolution.source, "resolved package manager");
    println!(
        "{} {}",
        "Installing with".cyan().bold(),
        resolution.manager.bold()
    );

    let failures = install_all(&mut session, resolution.manager, &targets).await?;

    println!();
    if failures == 0 {
        println!(
            "{} {} director{}",
            "Installed".green().bold(),
            targets.len(),
            if targets.len() == 1 { "y" } else { "ies" }
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} {} of {} directories failed",
            "Error:".red().bold(),
            failures,
            targets.len()
        );
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    scaffolder_core::logging::init(args.verbose);
    run(args).await
}
