//! Charm-style CLI prompts using cliclack

use crate::git::{self, GitSetup};
use crate::pm::{
    CommandRunner, InstallTarget, PmSession, PreferenceStore, ResolutionSource, SystemRunner,
    VerifyOptions,
};
use crate::project::{
    self, copy_template, install_targets, CopyOptions, Language, TemplateManifest,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_PROJECT_NAME: &str = "my-stack";

/// CLI arguments for the create command
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    /// Local directory to use for templates instead of the bundled ones
    pub template_dir: Option<PathBuf>,

    /// Auto-confirm all prompts (non-interactive mode)
    pub yes: bool,
}

/// Everything collected before anything is written
struct Answers {
    name: String,
    scope: Option<String>,
    language: Language,
    manager: &'static str,
    concurrent: bool,
    helper_routes: bool,
    install_now: bool,
    git: GitSetup,
}

/// Run the CLI with interactive prompts
pub async fn run(args: CreateArgs) -> Result<()> {
    cliclack::intro("create-stack")?;

    let current_dir = std::env::current_dir().context("Failed to read current directory")?;
    let mut session = PmSession::new(SystemRunner::new(), PreferenceStore::default_location());
    session.validate();

    // Step 1: Locate templates
    let templates_root = project::locate_templates(args.template_dir.as_deref())?;
    if args.template_dir.is_some() {
        cliclack::log::info(format!("Using local templates from {}", templates_root.display()))?;
    }

    // Step 2: Collect answers
    let name = select_name(&args, &current_dir)?;
    let project_dir = current_dir.join(&name);
    let scope = select_scope(&args)?;
    let language = select_language(&args)?;

    let template_dir = templates_root.join(language.template_dir());
    let manifest = TemplateManifest::load(&template_dir)?;

    let manager = select_manager(&session, &current_dir, &args).await?;
    let answers = Answers {
        name,
        scope,
        language,
        manager,
        concurrent: confirm(&args, "Run client and server together from the project root?", true)?,
        helper_routes: !manifest.helper_routes.is_empty()
            && confirm(&args, "Include example API routes?", true)?,
        install_now: confirm(&args, "Install dependencies now?", true)?,
        git: select_git(&args)?,
    };

    // Step 3: Create project
    create_project(&template_dir, &manifest, &project_dir, &answers).await?;

    // Step 4: Install, verify and report
    let mut used_manager = answers.manager;
    if answers.install_now {
        let targets = install_targets(&manifest, &project_dir);
        used_manager = install_dependencies(&mut session, &answers, &project_dir, &targets).await?;
    }

    // Step 5: Git
    setup_git(session.runner(), &project_dir, &answers.git).await?;

    // Step 6: Show next steps
    print_next_steps(&project_dir, &current_dir, used_manager, &answers)?;

    Ok(())
}

fn confirm(args: &CreateArgs, prompt: &str, default: bool) -> Result<bool> {
    if args.yes {
        return Ok(default);
    }
    Ok(cliclack::confirm(prompt).initial_value(default).interact()?)
}

fn select_name(args: &CreateArgs, current_dir: &Path) -> Result<String> {
    let name = if args.yes {
        project::validate_project_name(DEFAULT_PROJECT_NAME)?;
        cliclack::log::info(format!("Using project name: {}", DEFAULT_PROJECT_NAME))?;
        DEFAULT_PROJECT_NAME.to_string()
    } else {
        cliclack::input("Project name")
            .placeholder(DEFAULT_PROJECT_NAME)
            .default_input(DEFAULT_PROJECT_NAME)
            .validate(|input: &String| {
                project::validate_project_name(input).map_err(|e| e.to_string())
            })
            .interact()?
    };

    project::validate_project_name(&name)?;

    let target = current_dir.join(&name);
    let occupied = std::fs::read_dir(&target)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(true);
    if target.exists() && occupied {
        anyhow::bail!("Directory {} already exists and is not empty", target.display());
    }

    Ok(name)
}

fn select_scope(args: &CreateArgs) -> Result<Option<String>> {
    if args.yes {
        return Ok(None);
    }
    let input: String = cliclack::input("npm scope (optional)")
        .placeholder("@acme")
        .required(false)
        .validate(|input: &String| {
            project::normalize_scope(input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact()?;
    project::normalize_scope(&input)
}

fn select_language(args: &CreateArgs) -> Result<Language> {
    if args.yes {
        return Ok(Language::TypeScript);
    }
    let mut select = cliclack::select("Language");
    for language in Language::ALL {
        select = select.item(language, language.display_name(), "");
    }
    Ok(select.initial_value(Language::TypeScript).interact()?)
}

async fn select_manager<R: CommandRunner>(
    session: &PmSession<R>,
    current_dir: &Path,
    args: &CreateArgs,
) -> Result<&'static str> {
    let spinner = cliclack::spinner();
    spinner.start("Detecting package managers...");
    let detected = session.detect_managers().await;
    let resolution = session.resolve_manager(current_dir, None).await;

    if detected.is_empty() {
        spinner.stop("No package manager detected");
        cliclack::log::warning("Falling back to npm. Install Node.js if the install fails.")?;
        return Ok(resolution.manager);
    }
    let labels: Vec<&str> = detected.iter().map(|m| m.label.as_str()).collect();
    spinner.stop(format!("Detected: {}", labels.join(", ")));

    if args.yes {
        cliclack::log::info(format!("Using {}", resolution.manager))?;
        return Ok(resolution.manager);
    }

    let hint = match resolution.source {
        ResolutionSource::Preference(_) => "preferred",
        _ => "fastest",
    };
    let mut select = cliclack::select("Package manager");
    for manager in &detected {
        let item_hint = if manager.name == resolution.manager { hint } else { "" };
        select = select.item(manager.name, &manager.label, item_hint);
    }
    if detected.iter().any(|m| m.name == resolution.manager) {
        select = select.initial_value(resolution.manager);
    }
    Ok(select.interact()?)
}

fn select_git(args: &CreateArgs) -> Result<GitSetup> {
    if args.yes {
        return Ok(GitSetup::Init);
    }
    let choice: &str = cliclack::select("Initialize a git repository?")
        .item("init", "Yes", "")
        .item("remote", "Yes, and add a remote", "")
        .item("skip", "No", "")
        .interact()?;

    match choice {
        "init" => Ok(GitSetup::Init),
        "remote" => {
            let url: String = cliclack::input("Remote URL")
                .placeholder("git@github.com:owner/repo.git")
                .validate(|input: &String| {
                    if git::is_valid_remote(input) {
                        Ok(())
                    } else {
                        Err("Enter an https://, ssh:// or git@host:owner/repo URL")
                    }
                })
                .interact()?;
            Ok(GitSetup::InitWithRemote(url))
        }
        _ => Ok(GitSetup::Skip),
    }
}

async fn create_project(
    template_dir: &Path,
    manifest: &TemplateManifest,
    project_dir: &Path,
    answers: &Answers,
) -> Result<()> {
    let spinner = cliclack::spinner();
    spinner.start("Creating project...");

    let options = CopyOptions {
        project_name: answers.name.clone(),
        scope: answers.scope.clone(),
        concurrent: answers.concurrent,
        helper_routes: answers.helper_routes,
    };
    let copied_files = match copy_template(template_dir, manifest, project_dir, &options).await {
        Ok(files) => files,
        Err(e) => {
            spinner.error("Failed to create project");
            return Err(e);
        }
    };

    spinner.stop(format!(
        "Created {} files in {} ({})",
        copied_files.len(),
        project_dir.display(),
        answers.language
    ));

    Ok(())
}

/// Returns the manager that ended up installing
async fn install_dependencies<R: CommandRunner>(
    session: &mut PmSession<R>,
    answers: &Answers,
    project_dir: &Path,
    targets: &[InstallTarget],
) -> Result<&'static str> {
    let spinner = cliclack::spinner();
    spinner.start(format!("Installing dependencies with {}...", answers.manager));

    let outcome = match session.install(answers.manager, targets, answers.concurrent).await {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.error("Installation failed");
            for entry in session.fallback_log().entries() {
                cliclack::log::remark(format!(
                    "{} -> {}: {}",
                    entry.from,
                    entry.to,
                    entry.error.as_deref().unwrap_or("ok")
                ))?;
            }
            return Err(e).context("Dependency installation failed");
        }
    };
    spinner.stop(format!(
        "Installed dependencies with {} in {:.1}s",
        outcome.manager,
        outcome.report.total_duration.as_secs_f64()
    ));

    if let Some(from) = outcome.fallback_from {
        cliclack::log::warning(format!("{} failed, used {} instead", from, outcome.manager))?;
    }

    let verification = session
        .verify(outcome.manager, targets, &VerifyOptions::default())
        .await?;
    let summary = session.summarize(&outcome, &verification)?;
    if summary.success {
        cliclack::log::success(summary.to_string().trim_end())?;
    } else {
        cliclack::log::warning(summary.to_string().trim_end())?;
    }

    if !session.remember(project_dir, outcome.manager) {
        cliclack::log::warning("Could not save the package manager preference")?;
    }

    Ok(outcome.manager)
}

async fn setup_git<R: CommandRunner>(
    runner: &R,
    project_dir: &Path,
    setup: &GitSetup,
) -> Result<()> {
    if *setup == GitSetup::Skip {
        return Ok(());
    }
    let spinner = cliclack::spinner();
    spinner.start("Initializing git repository...");
    match git::initialize(runner, project_dir, setup).await {
        Ok(()) => spinner.stop("Initialized git repository"),
        Err(e) => {
            spinner.error(format!("Git setup skipped: {}", e));
            cliclack::log::info(e.remediation())?;
        }
    }
    Ok(())
}

fn print_next_steps(
    project_dir: &Path,
    current_dir: &Path,
    manager: &str,
    answers: &Answers,
) -> Result<()> {
    let mut steps = Vec::new();
    let relative = project_dir.strip_prefix(current_dir).unwrap_or(project_dir);

    steps.push(format!("cd {}", relative.display()));
    if !answers.install_now {
        if answers.concurrent {
            steps.push(format!("{} install", manager));
        }
        steps.push(format!(
            "(cd client && {} install) && (cd server && {} install)",
            manager, manager
        ));
    }
    if answers.concurrent {
        steps.push(format!("{} run dev", manager));
    } else {
        steps.push(format!("cd server && {} run dev", manager));
        steps.push(format!("cd client && {} run dev   (in a second terminal)", manager));
    }

    println!();
    println!("  Next steps");
    println!();

    for (i, step) in steps.iter().enumerate() {
        println!("  {}.  {}", i + 1, step);
    }

    cliclack::outro("Happy coding!")?;

    Ok(())
}
