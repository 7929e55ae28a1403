//! Keeper Harness CLI
//!
//! Setup and maintenance commands for the keeper workflow test environment.
//! The scenarios themselves run through `cargo test -- --ignored`.
//!
//! # Usage
//! ```bash
//! # Check that gh and git are installed and gh is authenticated
//! keeper-harness check
//!
//! # Point the harness at a repository and write a .env
//! keeper-harness setup --org my-org --repo my-repo --write-env
//!
//! # Validate the current configuration
//! keeper-harness validate
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use keeper_harness::repo::Baseline;
use keeper_harness::workflows;
use keeper_harness::{
    CommandRunner, ConfigLoader, Error, GitHubClient, Harness, InitOutcome, Invocation,
    RepoAccess, Result, SystemRunner, TestingConfig,
};

#[derive(Parser)]
#[command(name = "keeper-harness")]
#[command(about = "Test harness for keeper GitHub Actions workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Path of the .env file layered over the environment
    #[arg(long, env = "KEEPER_ENV_FILE", default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Checkout the harness runs from, checked by the self-reference guard
    #[arg(long, env = "KEEPER_REPO_DIR", default_value = ".", global = true)]
    repo_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that gh and git are installed and gh is authenticated
    Check,

    /// Show the current configuration
    Config,

    /// Show the configuration and validate repository access
    Validate,

    /// Validate a target repository and optionally write a .env for it
    Setup {
        /// GitHub organization or user owning the test repository
        #[arg(long)]
        org: String,

        /// Test repository name
        #[arg(long)]
        repo: String,

        /// Write TEST_GITHUB_ORG / TEST_GITHUB_REPO to the env file
        #[arg(long)]
        write_env: bool,

        /// Overwrite an existing env file
        #[arg(long)]
        force: bool,
    },

    /// Initialize the test repository now
    Init {
        /// Discard the completion marker and initialize again
        #[arg(long)]
        force: bool,

        /// Also store GITHUB_TOKEN as this repository secret
        #[arg(long)]
        token_secret: Option<String>,
    },

    /// Point workflow repository references at the configured repository
    FixWorkflows {
        /// Do not write .backup copies
        #[arg(long)]
        no_backup: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());

    match cli.command {
        Commands::Check => {
            let ok = print_prerequisites(runner.as_ref());
            Ok(exit_code(ok))
        }
        Commands::Config => {
            let config = loader(runner, &cli.repo_dir).load(&cli.env_file)?;
            print_summary(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            let prerequisites = print_prerequisites(runner.as_ref());
            let config = loader(runner, &cli.repo_dir).load(&cli.env_file)?;
            print_summary(&config);
            println!("\n🔍 Repository {} is accessible", config.primary_repo.full_name());

            let issues = workflows::validate_repository_references(
                &config.workflow_base_path,
                &config.primary_repo,
            );
            for issue in &issues {
                println!("   ⚠️ {}", issue);
            }
            if !issues.is_empty() {
                println!("   Run 'keeper-harness fix-workflows' to update the references");
            }
            Ok(exit_code(prerequisites))
        }
        Commands::Setup {
            org,
            repo,
            write_env,
            force,
        } => setup(runner, &org, &repo, write_env.then_some(cli.env_file.as_path()), force),
        Commands::Init {
            force,
            token_secret,
        } => {
            let config = loader(runner, &cli.repo_dir).load(&cli.env_file)?;
            let harness = Harness::new(config)?.with_working_dir(&cli.repo_dir);
            let session = harness.session();
            if force {
                session.reset()?;
            }

            let mut baseline = Baseline::standard(&harness.config)?;
            if let Some(name) = token_secret {
                baseline = baseline.with_token_secret(&harness.config, &name)?;
            }

            let outcome = session.ensure_initialized(|| {
                harness.repos.initialize_remote(&harness.config.primary_repo, &baseline)
            })?;
            match outcome {
                InitOutcome::Performed => {
                    println!("✅ Initialized {}", harness.config.primary_repo.full_name())
                }
                InitOutcome::Observed => println!(
                    "✅ {} already initialized this session (use --force to redo)",
                    harness.config.primary_repo.full_name()
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::FixWorkflows { no_backup } => {
            let config = loader(runner, &cli.repo_dir).load(&cli.env_file)?;
            let dir = &config.workflow_base_path;
            let files = workflows::list_keeper_workflows(dir)?;
            if files.is_empty() {
                println!("⚠️ No keeper-*.yml workflow files found in {}", dir.display());
                return Ok(ExitCode::SUCCESS);
            }
            for path in files {
                let changed = workflows::update_repository_references(
                    &path,
                    &config.primary_repo,
                    !no_backup,
                )?;
                let status = if changed { "updated" } else { "unchanged" };
                println!("   {} {}", status, path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn loader(runner: Arc<dyn CommandRunner>, repo_dir: &Path) -> ConfigLoader {
    ConfigLoader::new(runner).with_working_dir(repo_dir)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Prints the status of each required tool and returns whether all are present.
fn print_prerequisites(runner: &dyn CommandRunner) -> bool {
    let checks: [(&str, Invocation); 3] = [
        ("GitHub CLI", Invocation::new("gh", ["--version"])),
        ("Git", Invocation::new("git", ["--version"])),
        ("GitHub authentication", Invocation::new("gh", ["auth", "status"])),
    ];

    println!("\n🔧 Prerequisites:");
    let mut all_ok = true;
    for (name, invocation) in checks {
        let ok = matches!(runner.run(&invocation), Ok(output) if output.success);
        all_ok &= ok;
        println!("   {} {}", if ok { "✅" } else { "❌" }, name);
    }
    all_ok
}

fn print_summary(config: &TestingConfig) {
    let primary = &config.primary_repo;
    println!("\n{}", "=".repeat(60));
    println!("📋 TESTING CONFIGURATION SUMMARY");
    println!("{}", "=".repeat(60));

    println!("\n🎯 Primary Repository:");
    println!("   Organization: {}", primary.owner);
    println!("   Repository:   {}", primary.repo);
    println!("   Full Name:    {}", primary.full_name());
    println!("   GitHub URL:   {}", primary.github_url());

    if let Some(fork) = &config.fork_repo {
        println!("\n🍴 Fork Repository:");
        println!("   Full Name:    {}", fork.full_name());
        println!("   Parent:       {}", fork.fork_parent.as_deref().unwrap_or("-"));
    }

    println!("\n⚙️ Configuration:");
    println!("   Test Timeout:  {}s", config.test_timeout.as_secs());
    println!("   Poll Interval: {}s", config.poll_interval.as_secs());
    println!("   Cache Dir:     {}", config.cache_dir.display());
    println!("   Token:         {}", if config.github_token.is_some() { "set" } else { "not set" });

    println!("\n📋 Workflow Files:");
    match workflows::list_keeper_workflows(&config.workflow_base_path) {
        Ok(files) if !files.is_empty() => {
            for file in files {
                println!("   ✅ {}", file.display());
            }
        }
        _ => println!("   ⚠️ No keeper-*.yml workflow files found"),
    }

    println!("\n🚀 Usage:");
    println!("   # Run the live keeper workflow scenarios:");
    println!("   cargo test --test keeper_workflows -- --ignored");
}

fn setup(
    runner: Arc<dyn CommandRunner>,
    org: &str,
    repo: &str,
    env_file: Option<&Path>,
    force: bool,
) -> Result<ExitCode> {
    let full_name = format!("{}/{}", org, repo);
    println!("🔍 Validating repository {}...", full_name);

    match GitHubClient::new(runner).check_repository(&full_name)? {
        RepoAccess::Accessible => println!("✅ Repository {} is accessible", full_name),
        access => {
            println!("❌ Repository {} is not accessible", full_name);
            println!("   Please check:");
            println!("   - Repository name is correct");
            println!("   - You have access to the repository");
            println!("   - GitHub CLI is authenticated (run 'gh auth status')");
            access.into_result(&full_name)?;
        }
    }

    if let Some(path) = env_file {
        if path.exists() && !force {
            return Err(Error::Config(format!(
                "{} already exists, pass --force to overwrite",
                path.display()
            )));
        }
        std::fs::write(path, env_file_contents(org, repo))?;
        println!("✅ Wrote {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn env_file_contents(org: &str, repo: &str) -> String {
    format!(
        "# GitHub repository configuration for testing\n\
         TEST_GITHUB_ORG=\"{}\"\n\
         TEST_GITHUB_REPO=\"{}\"\n\
         \n\
         # Required for authenticated clone/push and secret provisioning\n\
         GITHUB_TOKEN=your_token_here\n",
        org, repo
    )
}
