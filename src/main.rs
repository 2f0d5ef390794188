use anyhow::Result;
use clap::Parser;
use is_terminal::IsTerminal;

use loghit::cli::{Cli, StatsFormat};
use loghit::config::ImportConfig;
use loghit::config_file::{extract_config_file_arg, ConfigFile};
use loghit::error::ImportError;
use loghit::platform::{CancelToken, ExitCode, SafeStdout, SignalHandler};
use loghit::{logging, recorder, StatsSnapshot};

fn main() {
    let mut cli = process_args_with_config();
    cli.resolve_boolean_flags(std::io::stdout().is_terminal());
    logging::init_logging(cli.debug);

    let config = match ImportConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("loghit: error: {}", e);
            ExitCode::InvalidUsage.exit();
        }
    };

    let mut stdout = SafeStdout::new();
    let exit_code = if config.input.dump_log_regex {
        dump_log_regex(&config, &mut stdout)
    } else {
        run(&config, &mut stdout)
    };

    match exit_code {
        Ok(code) => code.exit(),
        Err(e) => {
            eprintln!("loghit: error: {:#}", e);
            ExitCode::GeneralError.exit();
        }
    }
}

/// Parse the command line with the config file defaults in front of it
fn process_args_with_config() -> Cli {
    let raw_args: Vec<String> = std::env::args().collect();
    let config_file_path = extract_config_file_arg(&raw_args);
    let ignore_config = raw_args.iter().any(|arg| arg == "--ignore-config");

    let processed_args = if ignore_config {
        raw_args
    } else {
        match ConfigFile::load_with_custom_path(config_file_path.as_deref()) {
            Ok(config_file) => match config_file.process_args(raw_args) {
                Ok(processed) => processed,
                Err(e) => {
                    eprintln!("loghit: error: {:#}", e);
                    ExitCode::InvalidUsage.exit();
                }
            },
            Err(e) => {
                eprintln!("loghit: error: {:#}", e);
                ExitCode::GeneralError.exit();
            }
        }
    };

    // clap prints help and version on stdout with status 0, usage errors with status 2
    Cli::try_parse_from(processed_args).unwrap_or_else(|e| e.exit())
}

fn dump_log_regex(config: &ImportConfig, stdout: &mut SafeStdout) -> Result<ExitCode> {
    match loghit::describe_format(config) {
        Ok(Some(format)) => {
            stdout.writeln(&format!("Using format '{}'.", format.name()))?;
            match format.regex_pattern() {
                Some(pattern) => stdout.writeln(&format!("Regex being used: {}", pattern))?,
                None => stdout.writeln(&format!(
                    "Format {} does not use a regex to parse log lines.",
                    format.name()
                ))?,
            }
            stdout.writeln("--dump-log-regex option used, aborting log import.")?;
            Ok(ExitCode::Success)
        }
        Ok(None) => {
            stdout.writeln("No log format could be determined from the input files.")?;
            Ok(ExitCode::Success)
        }
        Err(e) => {
            report_error(&e);
            Ok(ExitCode::GeneralError)
        }
    }
}

fn run(config: &ImportConfig, stdout: &mut SafeStdout) -> Result<ExitCode> {
    let cancel = CancelToken::new();
    let (ctrl_tx, ctrl_rx) = crossbeam_channel::unbounded();
    let _signal_handler = match SignalHandler::new(ctrl_tx, cancel.clone()) {
        Ok(handler) => Some(handler),
        Err(e) => {
            tracing::warn!("signal handling unavailable: {:#}", e);
            None
        }
    };

    let sinks = match recorder::build_sinks(&config.recording) {
        Ok(sinks) => sinks,
        Err(e) => {
            report_error(&e);
            return Ok(ExitCode::InvalidUsage);
        }
    };

    if config.recording.dry_run {
        tracing::info!("dry run: nothing will be sent to the tracker");
    }

    let report = loghit::run_import(config, sinks, cancel.clone(), ctrl_rx);
    match report.result {
        Ok(()) => {
            print_summary(&report.snapshot, config.output.stats_format, stdout)?;
            Ok(ExitCode::Success)
        }
        Err(ImportError::Cancelled) => {
            print_summary(&report.snapshot, config.output.stats_format, stdout)?;
            Ok(cancel.exit_code().unwrap_or(ExitCode::SignalInt))
        }
        Err(e) => {
            report_error(&e);
            Ok(ExitCode::GeneralError)
        }
    }
}

fn print_summary(
    snapshot: &StatsSnapshot,
    format: StatsFormat,
    stdout: &mut SafeStdout,
) -> Result<()> {
    match format {
        StatsFormat::Table => stdout.writeln(&snapshot.to_text()),
        StatsFormat::Json => stdout.writeln(&snapshot.to_json()?),
    }
}

fn report_error(err: &ImportError) {
    eprintln!("loghit: error: {}", err);
    if let Some((file, line)) = err.resume_point() {
        eprintln!(
            "You can restart the import of \"{}\" from the point it failed by specifying --skip={} on the command line.",
            file, line
        );
    }
}
