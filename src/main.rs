// #![forbid(unsafe_code)]
// #![deny(non_upper_case_globals)]
// #![deny(non_camel_case_types)]
// #![deny(non_snake_case)]
// #![deny(unused_mut)]
// #![deny(unused_variables)]
// #![deny(dead_code)]
// #![deny(unused_imports)]
//#![deny(missing_docs)]
//#![deny(warnings)]

#[macro_use]
extern crate log;

use log::LevelFilter;
use mortar::app::registry::FunctionRegistry;
use mortar::app::{App, RunOptions};
use mortar::builtins::Builtins;
use mortar::configuration::command_line::{LogLevel, Opt};
use mortar::configuration::constants::common::{EXIT_FAILED, EXIT_LOAD_ERROR};
use mortar::configuration::manifest::Manifest;
use mortar::configuration::settings::Settings;
use mortar::database::sqlite::SqliteConnector;
use mortar::database::DatabaseManager;
use mortar::reporter;
use signal_hook::{iterator::Signals, SIGINT};
use std::{path::PathBuf, process::exit, thread};
use structopt::StructOpt;

fn main() {
    let options = Opt::from_args();

    if let Err(e) = init_logging(
        options.logging.unwrap_or(LogLevel::Info).into(),
        &options.log_output_file,
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match Signals::new(&[SIGINT]) {
        Ok(signals) => {
            thread::spawn(move || {
                for sig in signals.forever() {
                    info!("Received signal {:?}, stopping", sig);
                    exit(EXIT_FAILED);
                }
            });
        }
        Err(e) => warn!("Signal handling disabled: {}", e),
    }

    let settings = match Settings::from(options.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings {}", e);
            exit(EXIT_LOAD_ERROR);
        }
    };
    debug!("Initiated settings {:#?}", settings);

    let manifest = match Manifest::from(&options.file).and_then(|m| m.check().map(|_| m)) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to load manifest file configuration {}", e);
            exit(EXIT_LOAD_ERROR);
        }
    };
    debug!("Initiated configuration {:#?}", manifest);

    let mut registry = FunctionRegistry::new();
    registry.load(&Builtins);

    let client = match reqwest::blocking::Client::builder()
        .timeout(settings.request_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client {}", e);
            exit(EXIT_LOAD_ERROR);
        }
    };

    let run_options = RunOptions {
        workers: options
            .threads
            .or(settings.workers)
            .or(manifest.config.workers)
            .unwrap_or(1),
        request_timeout: settings.request_timeout,
        case_timeout: settings.case_timeout,
        cases: options.cases.clone(),
    };
    let report_path = options.report.clone().or_else(|| settings.report.clone());
    let databases = DatabaseManager::new(SqliteConnector::new(settings.databases));

    let app = App::new(manifest, registry, client, databases, run_options);
    let report = app.run();
    reporter::log_problems(&report);

    if let Some(path) = report_path {
        if let Err(e) = reporter::write_json(&report, &path) {
            error!("Failed to write report {}", e);
        }
    }

    if !report.succeeded() {
        exit(EXIT_FAILED);
    }
}

fn init_logging(level: LevelFilter, output: &Option<PathBuf>) -> Result<(), fern::InitError> {
    let mut dispatcher = fern::Dispatch::new()
        // Perform allocation-free log formatting
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}:{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record
                    .line()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "".to_owned()),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(log_file) = output {
        dispatcher = dispatcher.chain(fern::log_file(log_file)?)
    }
    dispatcher.apply()?;
    info!("Logging level {} enabled", level);
    Ok(())
}
