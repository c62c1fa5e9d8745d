use std::io::Write as _;
use std::sync::Arc;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use privsh::cli::{Cli, Commands};
use privsh::config::Config;
use privsh::session::{ActionChannel, EventListener, SessionEvent, SessionManager};
use privsh::{AppResult, init_logging};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Config subcommand runs before logging so its output stays clean
    if let Commands::Config { action } = cli.command() {
        Config::handle_command(&action, &cli.config_file)?;
        return Ok(());
    }

    let config = Config::load_or_default(&cli.config_file);
    let _log_guard = init_logging(&cli.effective_log_level(), &config.log)?;

    tracing::info!("privsh starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command() {
        Commands::Demo => privsh::shell::demo::run_demo().await?,
        Commands::Exec { command } => run_exec(&config, command.join(" ")).await?,
        Commands::Interactive => run_interactive(&config).await?,
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Run one command through the session and exit with its status
async fn run_exec(config: &Config, line: String) -> AppResult<()> {
    let session = SessionManager::new(config);
    let mut events = ActionChannel::new();

    session.run(vec![line], 0, EventListener::shared(0, events.event_tx()));

    let exit_code = match events.next_event().await {
        Some(SessionEvent::CommandCompleted {
            exit_code, output, ..
        }) => {
            for line in output {
                println!("{}", line);
            }
            exit_code
        }
        _ => {
            eprintln!("{}", "privileged shell unavailable".red());
            1
        }
    };

    session.shutdown();
    std::process::exit(exit_code);
}

/// Read command lines from stdin and dispatch them one at a time
async fn run_interactive(config: &Config) -> AppResult<()> {
    let session = SessionManager::new(config);
    let mut events = ActionChannel::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut next_code: i32 = 0;

    println!(
        "{} (escalating via {}; type 'exit' to leave)",
        "privsh interactive session".bold(),
        config.shell.program
    );

    loop {
        print!("{} ", "privsh>".cyan());
        std::io::stdout().flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        next_code += 1;
        session.run(
            vec![line],
            next_code,
            EventListener::shared(next_code, events.event_tx()),
        );

        match events.next_event().await {
            Some(SessionEvent::CommandCompleted {
                exit_code, output, ..
            }) => {
                for line in output {
                    println!("{}", line);
                }
                if exit_code != 0 {
                    println!("{}", format!("(exit {})", exit_code).yellow());
                }
            }
            Some(SessionEvent::CommandFailed { .. }) => {
                // the session recovers on the next submission
                println!("{}", "command failed: privileged shell died".red());
            }
            Some(SessionEvent::Error { message }) => {
                println!("{}", message.red());
            }
            None => break,
        }
    }

    session.shutdown();
    tracing::info!("interactive session ended");
    Ok(())
}
