use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use clap::{command, Parser};
use interactive_kernel::{
    event::EventReceiver, Error, EventPayload, InternalResult, Kernel, KernelCommand,
    KernelCommandResult, KernelConfig, KernelEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ikernel.json")]
    config: PathBuf,

    /// Additional profile script, run before the first command
    #[arg(short, long)]
    profile: Vec<PathBuf>,

    /// Skip all profile scripts
    #[arg(long)]
    no_profile: bool,

    /// Fail commands running longer than this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print every event as a JSON line
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Script to run as a single submission; starts a REPL when omitted
    script: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> InternalResult<KernelConfig> {
    let mut config = if cli.config.exists() {
        KernelConfig::from_file(&cli.config)?
    } else {
        KernelConfig::default()
    };
    config.profile.paths.extend(cli.profile.iter().cloned());
    if cli.no_profile {
        config.profile.enabled = false;
    }
    if let Some(millis) = cli.timeout_ms {
        config.command_timeout = Some(Duration::from_millis(millis));
    }
    Ok(config)
}

fn print_event(event: &KernelEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to serialize event: {}", e),
        }
        return;
    }
    match &event.payload {
        EventPayload::StandardOutputValueProduced { formatted_values } => {
            for formatted in formatted_values {
                print!("{}", formatted.value);
            }
        }
        EventPayload::StandardErrorValueProduced { formatted_values } => {
            for formatted in formatted_values {
                eprint!("{}", formatted.value);
            }
        }
        EventPayload::DisplayedValueProduced { slot, value, .. }
        | EventPayload::DisplayedValueUpdated { slot, value, .. } => {
            println!("[{}]\n{}", slot, value);
        }
        EventPayload::ValueInfosProduced { value_infos } => {
            for info in value_infos {
                println!("{} : {} = {}", info.name, info.type_name(), info.value);
            }
        }
        EventPayload::ValueProduced {
            formatted_value, ..
        } => println!("{}", formatted_value.value),
        EventPayload::CommandFailed { kind, message } => eprintln!("{}: {}", kind, message),
        _ => {}
    }
    let _ = std::io::stdout().flush();
}

/// Sends `command`, printing its events live as they reach the bus.
async fn send_and_print(
    kernel: &Kernel,
    events: &mut EventReceiver,
    command: KernelCommand,
    json: bool,
) -> KernelCommandResult {
    let send = kernel.send(command);
    tokio::pin!(send);
    loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(event) = event {
                    print_event(&event, json);
                }
            }
            result = &mut send => {
                for event in events.drain() {
                    print_event(&event, json);
                }
                return result;
            }
        }
    }
}

fn special_command(line: &str) -> Option<KernelCommand> {
    let mut words = line.split_whitespace();
    match (words.next()?, words.next(), words.next()) {
        ("#!values", None, None) => Some(KernelCommand::request_value_infos()),
        ("#!value", Some(name), None) => Some(KernelCommand::request_value(name)),
        ("#!value", Some(name), Some(mime_type)) => {
            Some(KernelCommand::request_value_as(name, mime_type))
        }
        _ => None,
    }
}

async fn repl(kernel: Arc<Kernel>, json: bool) -> InternalResult<()> {
    let (mut events, _errors) = kernel.subscribe();

    let cancel_kernel = kernel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !cancel_kernel.cancel() {
                eprintln!("\n(nothing running; use #!exit or Ctrl-D to quit)");
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = String::new();
    loop {
        print!("{}", if buffer.is_empty() { "> " } else { ">> " });
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if buffer.is_empty() {
            match line.trim() {
                "#!exit" => break,
                "#!reset" => {
                    kernel.reset().await;
                    continue;
                }
                trimmed => {
                    if let Some(command) = special_command(trimmed) {
                        send_and_print(&kernel, &mut events, command, json).await;
                        continue;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        let result = send_and_print(
            &kernel,
            &mut events,
            KernelCommand::submit_code(buffer.clone()),
            json,
        )
        .await;
        if !result.is_incomplete() {
            buffer.clear();
        }
    }
    Ok(())
}

async fn run(cli: &Cli) -> InternalResult<bool> {
    let config = load_config(cli)?;
    info!("config loaded.");
    debug!("config: {:?}", config);

    let kernel = Arc::new(Kernel::script(config));

    match &cli.script {
        Some(path) => {
            let code = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::Config(format!("Failed to read script {}: {}", path.display(), e)))?;
            let (mut events, _errors) = kernel.subscribe();
            let result =
                send_and_print(&kernel, &mut events, KernelCommand::submit_code(code), cli.json)
                    .await;
            Ok(result.succeeded() && !result.is_incomplete())
        }
        None => {
            repl(kernel, cli.json).await?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
