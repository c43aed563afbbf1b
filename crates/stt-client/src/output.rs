//! Transcribed-text output dispatch.
//!
//! `stdout` prints. `type` injects keystrokes into the focused window.
//! `clipboard` replaces the clipboard contents. The tool pair is chosen by
//! `XDG_SESSION_TYPE`; a missing tool logs an error and falls back to
//! printing so the text is never lost.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use stt_core::OutputMode;

/// Display-server family, from `XDG_SESSION_TYPE` (default X11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    X11,
    Wayland,
}

impl SessionKind {
    /// Detect from the environment.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_session_type(std::env::var("XDG_SESSION_TYPE").ok().as_deref())
    }

    #[must_use]
    pub fn from_session_type(value: Option<&str>) -> Self {
        match value {
            Some("wayland") => Self::Wayland,
            _ => Self::X11,
        }
    }
}

/// How a tool receives the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextVia {
    /// Piped to the child's stdin.
    Stdin,
    /// Appended as the final argument.
    Arg,
}

/// The external command for a given mode and display server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: &'static str,
    pub args: Vec<&'static str>,
    pub text_via: TextVia,
}

/// Choose the output tool. `None` means plain stdout.
#[must_use]
pub fn tool_command(mode: OutputMode, kind: SessionKind) -> Option<ToolCommand> {
    match (mode, kind) {
        (OutputMode::Stdout, _) => None,
        (OutputMode::Type, SessionKind::Wayland) => Some(ToolCommand {
            program: "wtype",
            args: vec!["-"],
            text_via: TextVia::Stdin,
        }),
        (OutputMode::Type, SessionKind::X11) => Some(ToolCommand {
            program: "xdotool",
            args: vec!["type", "--clearmodifiers", "--"],
            text_via: TextVia::Arg,
        }),
        (OutputMode::Clipboard, SessionKind::Wayland) => Some(ToolCommand {
            program: "wl-copy",
            args: vec![],
            text_via: TextVia::Stdin,
        }),
        (OutputMode::Clipboard, SessionKind::X11) => Some(ToolCommand {
            program: "xclip",
            args: vec!["-selection", "clipboard"],
            text_via: TextVia::Stdin,
        }),
    }
}

/// Deliver `text` according to `mode`, falling back to stdout when the
/// selected tool is not installed.
pub async fn dispatch(text: &str, mode: OutputMode) {
    let Some(tool) = tool_command(mode, SessionKind::detect()) else {
        println!("{text}");
        return;
    };

    match run_tool(&tool, text).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!(
                tool = tool.program,
                "Output tool not found, falling back to stdout"
            );
            println!("{text}");
        }
        Err(e) => {
            tracing::error!(tool = tool.program, error = %e, "Output tool failed");
        }
    }
}

async fn run_tool(tool: &ToolCommand, text: &str) -> std::io::Result<()> {
    let mut cmd = Command::new(tool.program);
    cmd.args(&tool.args);

    match tool.text_via {
        TextVia::Arg => {
            let status = cmd.arg(text).status().await?;
            check_status(tool.program, status)
        }
        TextVia::Stdin => {
            let mut child = cmd.stdin(Stdio::piped()).spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await?;
                drop(stdin);
            }
            let status = child.wait().await?;
            check_status(tool.program, status)
        }
    }
}

fn check_status(program: &str, status: std::process::ExitStatus) -> std::io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "{program} exited with {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_kind_defaults_to_x11() {
        assert_eq!(SessionKind::from_session_type(None), SessionKind::X11);
        assert_eq!(SessionKind::from_session_type(Some("x11")), SessionKind::X11);
        assert_eq!(SessionKind::from_session_type(Some("tty")), SessionKind::X11);
        assert_eq!(
            SessionKind::from_session_type(Some("wayland")),
            SessionKind::Wayland
        );
    }

    #[test]
    fn stdout_needs_no_tool() {
        assert_eq!(tool_command(OutputMode::Stdout, SessionKind::X11), None);
        assert_eq!(tool_command(OutputMode::Stdout, SessionKind::Wayland), None);
    }

    #[test]
    fn typing_tools_match_the_display_server() {
        let x11 = tool_command(OutputMode::Type, SessionKind::X11).unwrap();
        assert_eq!(x11.program, "xdotool");
        assert_eq!(x11.args, vec!["type", "--clearmodifiers", "--"]);
        assert_eq!(x11.text_via, TextVia::Arg);

        let wayland = tool_command(OutputMode::Type, SessionKind::Wayland).unwrap();
        assert_eq!(wayland.program, "wtype");
        assert_eq!(wayland.text_via, TextVia::Stdin);
    }

    #[test]
    fn clipboard_tools_match_the_display_server() {
        let x11 = tool_command(OutputMode::Clipboard, SessionKind::X11).unwrap();
        assert_eq!(x11.program, "xclip");
        assert_eq!(x11.args, vec!["-selection", "clipboard"]);

        let wayland = tool_command(OutputMode::Clipboard, SessionKind::Wayland).unwrap();
        assert_eq!(wayland.program, "wl-copy");
        assert!(wayland.args.is_empty());
    }
}
