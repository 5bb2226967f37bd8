use anyhow::{Context, Result};
use autonet::{AutoLogin, LoginConfig, observer::LogObserver, proxy};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use log::{LevelFilter, error, info};
use std::{io::Write, path::PathBuf, process::ExitCode};

#[derive(Debug, Parser)]
#[command(version, about = "Automatic campus ePortal login")]
struct Cli {
    /// Path of the config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable debug output
    #[arg(short, long, conflicts_with = "silent")]
    debug: bool,

    /// Only log warnings and errors, exit with 0 on failed logins
    #[arg(short, long)]
    silent: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in to the campus network (default)
    Login,
    /// Send a test message to the configured webhooks
    NotifyTest {
        #[arg(long)]
        markdown: bool,
    },
    /// Update and save the config file
    Configure {
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Replaces the configured webhooks; repeat for several
        #[arg(long = "webhook")]
        webhooks: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    initialize(&cli);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) if cli.silent => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("application error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn initialize(cli: &Cli) {
    log_panics::init();

    let default_level = if cli.debug || cfg!(debug_assertions) && !cli.silent {
        "debug"
    } else if cli.silent {
        "warn"
    } else {
        "info"
    };

    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));
    if cli.debug {
        builder.filter_level(LevelFilter::Debug);
    }

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("autonet version: {}", env!("CARGO_PKG_VERSION"));
}

fn run(cli: &Cli) -> Result<bool> {
    let config = LoginConfig::load(&cli.config);

    match &cli.command {
        None | Some(Command::Login) => {
            let (success, _message) = auto_login(config)?.login();
            Ok(success)
        }
        Some(Command::NotifyTest { markdown }) => {
            auto_login(config)?.send_test_notification(*markdown)
        }
        Some(Command::Configure {
            student_id,
            password,
            webhooks,
        }) => {
            let mut config = config;
            if let Some(student_id) = student_id {
                config.student_id = student_id.trim().to_string();
            }
            if let Some(password) = password {
                config.password = password.clone();
            }
            if !webhooks.is_empty() {
                config.webhook_urls = webhooks.clone();
            }

            let path = config.save(&cli.config)?;
            info!("config written to {path:?}");
            Ok(config.is_complete())
        }
    }
}

fn auto_login(config: LoginConfig) -> Result<AutoLogin> {
    AutoLogin::with_system_probe(config, LogObserver::shared(), proxy::default_resolver())
        .context("failed to initialize autonet")
}
