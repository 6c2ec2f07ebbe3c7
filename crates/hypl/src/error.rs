use thiserror::Error;

/// Errors produced while compiling or executing hypl source.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more diagnostics collected by the scanner/parser.
    ///
    /// The message holds every diagnostic reported before the parser gave
    /// up, one per line, in the `[ERROR | N line] at 'lexeme': message`
    /// format.
    #[error("{message}")]
    Compile { message: String },

    /// A runtime failure, with the call-stack trace at the point of failure
    /// (most recent frame first).
    #[error("{}", render_runtime(.message, .trace))]
    Runtime {
        message: String,
        trace: Vec<String>,
    },
}

fn render_runtime(message: &str, trace: &[String]) -> String {
    if trace.is_empty() {
        message.to_string()
    } else {
        format!("{}\n{}", message, trace.join("\n"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
