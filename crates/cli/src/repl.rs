use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::Session;
use crate::output::LiveOutput;
use crate::{print_json_line, status_output};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand<'a> {
    Quit,
    Status,
    Wait,
    Restart,
    Live(&'a str),
    Query(&'a str),
}

impl<'a> ReplCommand<'a> {
    fn parse(line: &'a str) -> Result<Self, String> {
        let Some(directive) = line.strip_prefix(':') else {
            return Ok(Self::Query(line));
        };
        let (name, rest) = directive
            .split_once(char::is_whitespace)
            .map_or((directive, ""), |(name, rest)| (name, rest.trim()));
        match name {
            "q" | "quit" => Ok(Self::Quit),
            "status" => Ok(Self::Status),
            "wait" => Ok(Self::Wait),
            "restart" => Ok(Self::Restart),
            "live" => Ok(Self::Live(rest)),
            other => Err(format!("unknown directive :{other}")),
        }
    }
}

#[derive(Serialize)]
struct ReplError {
    error: String,
}

/// Reads one query per line from stdin and prints one JSON object per line.
///
/// Lines starting with `:` are directives: `:status`, `:wait`, `:restart`,
/// `:live <text>` and `:quit`.
pub(crate) async fn run(session: &Session, context: Option<String>, timeout: Duration) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match ReplCommand::parse(line) {
            Ok(ReplCommand::Quit) => break,
            Ok(ReplCommand::Status) => print_json_line(&status_output(session))?,
            Ok(ReplCommand::Wait) => {
                session.settle(timeout).await;
                print_json_line(&status_output(session))?;
            }
            Ok(ReplCommand::Restart) => {
                session
                    .pipeline
                    .force_restart()
                    .await
                    .context("Failed to restart pipeline")?;
                print_json_line(&status_output(session))?;
            }
            Ok(ReplCommand::Live(text)) => {
                let live = live_search(session, text, context.clone(), timeout).await?;
                print_json_line(&live)?;
            }
            Ok(ReplCommand::Query(text)) => {
                let output = session.resolve(text, context.clone()).await;
                print_json_line(&output)?;
            }
            Err(error) => print_json_line(&ReplError { error })?,
        }
    }
    Ok(())
}

async fn live_search(
    session: &Session,
    text: &str,
    context: Option<String>,
    timeout: Duration,
) -> Result<LiveOutput> {
    let mut live_rx = session.orchestrator.subscribe_live();
    let generation = session.orchestrator.on_input(text, context)?;
    let settled = tokio::time::timeout(timeout, async {
        live_rx
            .wait_for(|live| live.generation >= generation)
            .await
            .map(|_| ())
    })
    .await;
    match settled {
        Ok(Ok(())) => {}
        Ok(Err(_)) => anyhow::bail!("Live search loop stopped"),
        Err(_) => log::warn!("No live results for {text:?} within {}s", timeout.as_secs()),
    }
    let live = session.orchestrator.live_results();
    Ok(LiveOutput::new(&live, &session.registry, &session.vocabulary))
}
