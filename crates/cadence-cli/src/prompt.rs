//! Terminal side of the approval channel: asks before each command and echoes its output.

use cadence_tooling::{ApprovalDecision, ApprovalEvent, OutputStream, PendingCommand};
use console::{Term, style};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::spawn_blocking;

/// Answers approval requests until the surface that sends them is dropped.
pub async fn serve_approvals(mut events: UnboundedReceiver<ApprovalEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ApprovalEvent::Requested { command, responder } => {
                let decision = spawn_blocking(move || ask(&command))
                    .await
                    .unwrap_or(ApprovalDecision::Abandoned);
                if responder.send(decision).is_err() {
                    tracing::warn!("Approval answer arrived after the request expired");
                }
            }
            ApprovalEvent::Running { .. } => {}
            ApprovalEvent::Output { line, .. } => {
                let text = match line.stream {
                    OutputStream::Stdout => style(line.text).dim().to_string(),
                    OutputStream::Stderr => style(line.text).red().to_string(),
                };
                write_line(&text);
            }
            ApprovalEvent::Completed {
                exit_code,
                duration_ms,
                ..
            } => {
                let status = match exit_code {
                    Some(0) => style("ok".to_owned()).green(),
                    Some(code) => style(format!("exit {code}")).red(),
                    None => style("killed".to_owned()).red(),
                };
                write_line(&format!("  {status} ({duration_ms}ms)"));
            }
        }
    }
}

fn ask(command: &PendingCommand) -> ApprovalDecision {
    let term = Term::stderr();
    let question = format!(
        "{} {}\n  in {}\n  run it? [y/N] ",
        style("?").yellow().bold(),
        style(&command.command).bold(),
        command.working_directory.display()
    );
    if let Err(error) = term.write_str(&question) {
        tracing::warn!("Cannot prompt for approval: {error}");
        return ApprovalDecision::Abandoned;
    }
    match term.read_line() {
        Ok(answer) => parse_answer(&answer),
        Err(error) => {
            tracing::warn!("Cannot read approval answer: {error}");
            ApprovalDecision::Abandoned
        }
    }
}

/// Only an explicit yes approves.
fn parse_answer(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approved,
        _ => ApprovalDecision::Rejected,
    }
}

fn write_line(text: &str) {
    if let Err(error) = Term::stderr().write_line(text) {
        tracing::debug!("Dropped output line: {error}");
    }
}
