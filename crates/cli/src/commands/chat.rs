use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::commands::{async_runtime, load_config, CommandResult, EXIT_RUNTIME_FAILURE};
use parley_agent::DialogueRuntime;
use parley_core::config::ConfigOverrides;
use parley_db::{connect_with_config, migrations};

pub const DEFAULT_THREAD: &str = "cli-local";

/// Local interactive channel: one line in, the rendered messages out.
/// `/quit`, `/exit` or end of input ends the session.
pub fn run(thread_id: Option<String>, catalog_path: Option<PathBuf>) -> CommandResult {
    let overrides = ConfigOverrides { catalog_path, ..ConfigOverrides::default() };
    let config = match load_config("chat", overrides) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };
    let thread_id = thread_id.unwrap_or_else(|| DEFAULT_THREAD.to_string());

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;
        let dialogue = DialogueRuntime::bootstrap(&config, pool.clone())
            .await
            .map_err(|error| ("initialization", error.to_string()))?;

        let input = BufReader::new(tokio::io::stdin());
        let mut output = tokio::io::stdout();
        let turns = converse(&dialogue, &thread_id, input, &mut output)
            .await
            .map_err(|error| ("chat_io", error.to_string()))?;

        pool.close().await;
        Ok::<usize, (&'static str, String)>(turns)
    });

    match result {
        Ok(turns) => CommandResult::success(
            "chat",
            format!("session on thread `{thread_id}` ended after {turns} turns"),
        ),
        Err((error_class, message)) => {
            CommandResult::failure("chat", error_class, message, EXIT_RUNTIME_FAILURE)
        }
    }
}

/// Runs turns for each non-blank input line and writes `bot> ` prefixed
/// messages. Lines are passed on as raw bytes, so malformed UTF-8 becomes a
/// fallback turn instead of ending the session. Turn failures are reported
/// inline and the session continues.
pub async fn converse<R, W>(
    runtime: &DialogueRuntime,
    thread_id: &str,
    mut input: R,
    output: &mut W,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let mut turns = 0;

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let raw = trim_line(&line);
        if raw.is_empty() {
            continue;
        }
        if raw == b"/quit" || raw == b"/exit" {
            break;
        }

        turns += 1;
        match runtime.process_raw_turn(thread_id, raw).await {
            Ok(decision) => {
                for message in &decision.messages {
                    output.write_all(format!("bot> {message}\n").as_bytes()).await?;
                }
            }
            Err(error) => {
                let interface = error.into_interface(format!("{thread_id}#{turns}"));
                let line = format!("error> {} ({})\n", interface.user_message(), interface);
                output.write_all(line.as_bytes()).await?;
            }
        }
    }

    output.flush().await?;
    Ok(turns)
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|byte| !byte.is_ascii_whitespace()).unwrap_or(raw.len());
    let end =
        raw.iter().rposition(|byte| !byte.is_ascii_whitespace()).map_or(start, |last| last + 1);
    &raw[start..end]
}

#[cfg(test)]
mod tests {
    use super::trim_line;

    #[test]
    fn trim_line_strips_ascii_whitespace_and_newlines() {
        assert_eq!(trim_line(b"  /greet \r\n"), b"/greet");
        assert_eq!(trim_line(b" \t\n"), b"");
        assert_eq!(trim_line(b"\xffok"), b"\xffok");
    }
}
