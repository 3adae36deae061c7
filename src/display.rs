//! Terminal rendering of the merged chat stream.
//!
//! ```text
//! [TTV] nightbot • 21:04:13
//!     !commands
//! ────────────────────────────────
//! ```

use std::io::{self, Write};

use chrono::Local;
use crossterm::style::{Attribute, Color, ContentStyle};
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::{Message, Platform};

const SEPARATOR: &str = "────────────────────────────────";

fn style(color: Color, bold: bool) -> ContentStyle {
    let mut style = ContentStyle {
        foreground_color: Some(color),
        ..ContentStyle::default()
    };
    if bold {
        style.attributes.set(Attribute::Bold);
    }
    style
}

fn dim() -> ContentStyle {
    style(Color::DarkGrey, false)
}

fn platform_style(platform: Platform) -> ContentStyle {
    match platform {
        Platform::Twitch => style(Color::Magenta, true),
        Platform::YouTube => style(Color::Red, true),
        Platform::HackrTv => style(Color::Green, true),
    }
}

/// Writes messages to a terminal (or any writer), optionally coloured.
pub struct Printer<W> {
    out: W,
    color: bool,
}

impl Printer<io::Stdout> {
    /// Printer on stdout.
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> Printer<W> {
    /// Printer on an arbitrary writer.
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn paint(&self, text: &str, style: ContentStyle) -> String {
        if self.color {
            style.apply(text).to_string()
        } else {
            text.to_owned()
        }
    }

    /// Render one message as three lines: header, indented body, separator.
    pub fn render(&self, msg: &Message) -> String {
        let tag = self.paint(&format!("[{}]", msg.platform.code()), platform_style(msg.platform));
        let username = self.paint(&msg.username, style(Color::Cyan, false));
        let bullet = self.paint("•", dim());
        let time = msg.timestamp.with_timezone(&Local).format("%H:%M:%S").to_string();
        let time = self.paint(&time, dim());
        let separator = self.paint(SEPARATOR, dim());
        format!(
            "{tag} {username} {bullet} {time}\n    {}\n{separator}\n",
            msg.content
        )
    }

    /// Write one message and flush.
    ///
    /// # Errors
    ///
    /// Propagates write errors from the underlying writer.
    pub fn print(&mut self, msg: &Message) -> io::Result<()> {
        let rendered = self.render(msg);
        self.out.write_all(rendered.as_bytes())?;
        self.out.flush()
    }

    /// Print everything from `rx` until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Message>) -> W {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.print(&msg) {
                warn!(error = %e, "failed to write message to terminal");
            }
        }
        self.out
    }
}
