mod app;

use app::App;
use news_digest::config::Config;
use news_digest::error::{AppError, Result};

const USAGE: &str = "\
Usage: news-digest [COMMAND]

Commands:
  headlines                          List top headlines (default)
  search <query>                     List articles matching a query
  read <n> [--search <query>]        Show article number n
  summarize [--structured] [--search <query>]
                                     Summarize the current articles
  chat [--search <query>]            Summarize, then ask follow-up questions
  check                              Report whether the AI backend is available
  help                               Show this message";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Headlines,
    Search(String),
    Read { number: usize, query: Option<String> },
    Summarize { structured: bool, query: Option<String> },
    Chat { query: Option<String> },
    Check,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Headlines);
    };
    let rest = &args[1..];

    let mut query = None;
    let mut structured = false;
    let mut positional = Vec::new();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--search" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--search needs a query".to_string()))?;
                query = Some(value.clone());
            }
            "--structured" => structured = true,
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match command.as_str() {
        "headlines" => Command::Headlines,
        "search" if !positional.is_empty() => Command::Search(positional.join(" ")),
        "search" => return Err(AppError::Config("search needs a query".to_string())),
        "read" => {
            let number = positional
                .first()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| AppError::Config("read needs an article number".to_string()))?;
            Command::Read { number, query }
        }
        "summarize" => Command::Summarize { structured, query },
        "chat" => Command::Chat { query },
        "check" => Command::Check,
        "help" | "--help" | "-h" => Command::Help,
        other => return Err(AppError::Config(format!("Unknown command: {}", other))),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Only warnings and errors unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let app = App::new(&config);

    let result = match command {
        Command::Headlines => app.list(None).await,
        Command::Search(query) => app.list(Some(&query)).await,
        Command::Read { number, query } => app.read(number, query.as_deref()).await,
        Command::Summarize { structured, query } => {
            app.summarize(query.as_deref(), structured).await
        }
        Command::Chat { query } => app.chat(query.as_deref()).await,
        Command::Check => app.check().await,
        Command::Help => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
