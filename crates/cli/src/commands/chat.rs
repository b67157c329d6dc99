use std::sync::Arc;

use anyhow::Result;
use parlor_agent::Orchestrator;
use parlor_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{build_runtime, CommandResult};

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

pub fn run(assistant_name: Option<String>) -> CommandResult {
    let options = LoadOptions {
        overrides: ConfigOverrides { assistant_name, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), 2)
        }
    };
    let runtime = match build_runtime(&config) {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("chat", "runtime_setup", error, 4),
    };

    let mut orchestrator = Orchestrator::new(Arc::new(runtime), config.assistant.name.clone());
    orchestrator.set_user_name(config.assistant.user_name.clone());

    let tokio_runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_setup",
                format!("failed to initialize async runtime: {error}"),
                4,
            )
        }
    };

    let result = tokio_runtime.block_on(async {
        let mut stdout = tokio::io::stdout();
        converse(&mut orchestrator, BufReader::new(tokio::io::stdin()), &mut stdout).await
    });

    match result {
        Ok(_) => CommandResult::silent(0),
        Err(error) => CommandResult::failure("chat", "io", error.to_string(), 5),
    }
}

/// Greets, then answers one line at a time until EOF or an exit word.
/// A failed turn is reported and the conversation goes on. Returns the number of
/// turns answered.
pub async fn converse<R, W>(
    orchestrator: &mut Orchestrator,
    input: R,
    output: &mut W,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let greeting = orchestrator.start().await?;
    let assistant = orchestrator.assistant_name().to_string();
    write_line(output, &format!("{assistant}: {greeting}")).await?;

    let mut answered = 0;
    let mut lines = input.lines();
    loop {
        output.write_all(format!("{}: ", orchestrator.user_name()).as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&text.to_ascii_lowercase().as_str()) {
            break;
        }

        match orchestrator.respond(text).await {
            Ok(reply) => {
                answered += 1;
                write_line(output, &format!("{assistant}: {reply}")).await?;
            }
            Err(error) => write_line(output, &format!("error: {error}")).await?,
        }
    }

    Ok(answered)
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
