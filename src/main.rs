use clap::Parser;
use digitakt_midi::midi::{connect_output, list_output_ports, LogSink, SharedSink};
use digitakt_midi::{spawn_engine, Config, Engine, EngineCommand, EngineUpdate};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "digitakt-midi")]
#[command(about = "Digitakt II MIDI tools over JSON lines on stdin/stdout", long_about = None)]
struct Cli {
    /// RON config file (overrides DIGITAKT_MIDI_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log MIDI output instead of sending it to the device
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    // stdout carries responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let args = Cli::parse();
    let config = match Config::resolve(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let sink: Option<SharedSink> = if args.dry_run {
        info!("Dry run: MIDI output goes to the log");
        Some(Arc::new(LogSink) as SharedSink)
    } else {
        match connect_output(&config.client_name, &config.port_name) {
            Ok(sink) => Some(Arc::new(sink) as SharedSink),
            Err(e) => {
                warn!("{}; output tools will fail until restarted", e);
                if let Ok(ports) = list_output_ports(&config.client_name) {
                    info!("Available outputs: {}", ports.join(", "));
                }
                None
            }
        }
    };

    let engine = match spawn_engine(Engine::new(config, sink)) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let command_tx = engine.command_tx.clone();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    if command_tx.send(EngineCommand::Request(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("stdin: {}", e);
                    break;
                }
            }
        }
        let _ = command_tx.send(EngineCommand::Shutdown);
    });

    let mut stdout = io::stdout().lock();
    loop {
        let Ok(update) = engine.update_rx.recv() else {
            error!("Engine stopped without shutting down");
            return ExitCode::FAILURE;
        };
        match update {
            EngineUpdate::Response(response) => {
                let written = serde_json::to_string(&response)
                    .map_err(io::Error::from)
                    .and_then(|line| writeln!(stdout, "{line}"))
                    .and_then(|()| stdout.flush());
                if let Err(e) = written {
                    error!("Failed to write response: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            EngineUpdate::Stopped => break,
        }
    }
    info!("Shut down");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["digitakt-midi", "--config", "studio.ron", "--dry-run"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("studio.ron")));
        assert!(cli.dry_run);

        let cli = Cli::try_parse_from(["digitakt-midi"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(Cli::try_parse_from(["digitakt-midi", "--config"]).is_err());
        assert!(Cli::try_parse_from(["digitakt-midi", "--loud"]).is_err());
    }
}
