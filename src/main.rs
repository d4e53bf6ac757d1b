// src/main.rs

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use true_stretch::app;
use true_stretch::config::{Config, Plan, DEFAULT_CONFIG_PATH};
use true_stretch::notify::{AlertLevel, Notifier};
use true_stretch::platform::{self, Platform};
use true_stretch::StretchError;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the screen's modes and the one that would be chosen, as JSON, then exit.
    #[arg(long)]
    list_modes: bool,

    /// Overrides `display.screen_index`.
    #[arg(long)]
    screen: Option<u32>,
}

fn main() -> ExitCode {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = Cli::parse();
    let mut notifier = platform::native_notifier();

    let plan = match load_plan(&cli) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{}", e);
            notifier.alert(AlertLevel::Error, &e.to_string());
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Screen {}, aspect ratio {}, target '{}'",
        plan.screen_index, plan.aspect_ratio, plan.window_class
    );

    let mut platform = match Platform::native() {
        Ok(platform) => platform,
        Err(e) => return app::report(&Err(e), notifier.as_mut()),
    };

    if cli.list_modes {
        return list_modes(&platform, &plan, notifier.as_mut());
    }

    platform::install_termination_handlers();
    let result = app::run(&mut platform, notifier.as_mut(), &plan);
    app::report(&result, notifier.as_mut())
}

fn load_plan(cli: &Cli) -> Result<Plan, StretchError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(screen) = cli.screen {
        config.display.screen_index = screen;
    }
    Ok(config.validate()?)
}

fn list_modes(platform: &Platform, plan: &Plan, notifier: &mut dyn Notifier) -> ExitCode {
    let report = app::describe_modes(platform, plan.screen_index, plan.aspect_ratio)
        .and_then(|report| {
            serde_json::to_string_pretty(&report)
                .map_err(|e| StretchError::Platform(anyhow::Error::new(e)))
        });
    match report {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => app::report(&Err(e), notifier),
    }
}
