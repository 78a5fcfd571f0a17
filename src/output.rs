use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// tests can capture what a command prints, and so that `--json` output on
/// stdout stays separate from human-oriented messages.
pub trait UserOutput: Send + Sync {
    /// Primary output (tables, JSON documents, log lines).
    fn status(&self, message: &str);

    /// Success message (e.g., "Stopped acme-web")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Backend unreachable, showing stored state")
    fn warning(&self, message: &str);

    /// Error message.
    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    /// Finish an inline progress line with a result.
    fn finish_progress(&self, result: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output. Progress and warnings go to stderr so that stdout
/// can be piped.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        eprint!("{}", message);
        std::io::stderr().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        eprintln!("{}", result);
    }

    fn blank(&self) {
        println!();
    }
}

/// Collects output in memory.
#[cfg(test)]
#[derive(Default)]
pub struct CapturedOutput {
    lines: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CapturedOutput {
    pub fn text(&self) -> String {
        self.lines.lock().join("\n")
    }

    fn push(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }
}

#[cfg(test)]
impl UserOutput for CapturedOutput {
    fn status(&self, message: &str) {
        self.push(message);
    }
    fn success(&self, message: &str) {
        self.push(message);
    }
    fn warning(&self, message: &str) {
        self.push(message);
    }
    fn error(&self, message: &str) {
        self.push(message);
    }
    fn progress(&self, message: &str) {
        self.push(message);
    }
    fn finish_progress(&self, result: &str) {
        self.push(result);
    }
    fn blank(&self) {
        self.push("");
    }
}
