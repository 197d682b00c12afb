//! Records of executed terminal steps, as handed to failure recovery.

use serde::{Deserialize, Serialize};

/// Outcome of running one terminal step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTranscript {
    /// Command line that was run
    pub command: String,
    /// Exit code; `-1` when the process never produced one
    pub exit_code: i32,
    /// Captured standard output, newline-joined
    pub stdout: String,
    /// Captured standard error, newline-joined
    pub stderr: String,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Whether the command was killed on timeout
    pub timed_out: bool,
}

impl CommandTranscript {
    /// True when the command exited with code 0 before any timeout.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Renders the transcript for inclusion in a prompt, clipping long streams.
    #[must_use]
    pub fn render(&self, max_stream_chars: usize) -> String {
        let status = if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            format!("exit code {}", self.exit_code)
        };
        format!(
            "$ {}\n({status}, {}ms)\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
            self.command,
            self.duration_ms,
            clip_tail(&self.stdout, max_stream_chars),
            clip_tail(&self.stderr, max_stream_chars),
        )
    }
}

/// Keeps the last `max_chars` characters; errors usually sit at the end of a stream.
fn clip_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let skipped = total - max_chars;
    let tail: String = text.chars().skip(skipped).collect();
    format!("[... {skipped} chars omitted]\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(exit_code: i32, timed_out: bool) -> CommandTranscript {
        CommandTranscript {
            command: "cargo test".to_owned(),
            exit_code,
            stdout: "running 1 test".to_owned(),
            stderr: "error[E0425]: cannot find value".to_owned(),
            duration_ms: 42,
            timed_out,
        }
    }

    #[test]
    fn test_succeeded() {
        assert!(transcript(0, false).succeeded());
        assert!(!transcript(1, false).succeeded());
        assert!(!transcript(0, true).succeeded());
    }

    #[test]
    fn test_render_includes_streams() {
        let rendered = transcript(101, false).render(1000);
        assert!(rendered.contains("$ cargo test"));
        assert!(rendered.contains("exit code 101"));
        assert!(rendered.contains("error[E0425]"));
    }

    #[test]
    fn test_render_clips_long_output() {
        let mut long = transcript(1, false);
        long.stdout = "x".repeat(50);
        let rendered = long.render(10);
        assert!(rendered.contains("[... 40 chars omitted]"));
    }
}
