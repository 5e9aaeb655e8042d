use crate::models::chat::{ Message, RenderHint, Role };
use crate::session::{ SessionEvent, TimelineView, WaitingState };
use crate::transport::ConnectionState;
use log::{ debug, error };
use std::collections::HashMap;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::{ mpsc, watch };

pub const HELP: &str =
    "Commands: reset | clear | :retry <text> | :pin <id> | :unpin <id> | :upload <file> | :typing on|off | :quit";

#[derive(Debug, PartialEq, Eq)]
pub enum ShellAction {
    Events(Vec<SessionEvent>),
    Help,
    Quit,
}

pub fn parse_line(line: &str) -> ShellAction {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix(':') else {
        return ShellAction::Events(vec![SessionEvent::Submit(line.to_string())]);
    };
    let (verb, arg) = match rest.split_once(' ') {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };

    let event = match (verb, arg) {
        ("quit", _) => {
            return ShellAction::Quit;
        }
        ("retry", text) if !text.is_empty() => SessionEvent::Retry(text.to_string()),
        ("pin", id) if !id.is_empty() => SessionEvent::SetPinned { id: id.to_string(), value: true },
        ("unpin", id) if !id.is_empty() =>
            SessionEvent::SetPinned { id: id.to_string(), value: false },
        ("upload", name) if !name.is_empty() => {
            return ShellAction::Events(
                vec![
                    SessionEvent::UploadStarted(name.to_string()),
                    SessionEvent::UploadCompleted(name.to_string())
                ]
            );
        }
        ("typing", "on") => SessionEvent::TypingStarted,
        ("typing", "off") => SessionEvent::TypingStopped,
        _ => {
            return ShellAction::Help;
        }
    };
    ShellAction::Events(vec![event])
}

/// Reads stdin lines into session events until EOF or `:quit`.
pub async fn read_input(events: mpsc::UnboundedSender<SessionEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        match parse_line(&line) {
            ShellAction::Events(batch) => {
                for event in batch {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            ShellAction::Help => println!("{}", HELP),
            ShellAction::Quit => break,
        }
    }
    debug!("Input closed");
    let _ = events.send(SessionEvent::Shutdown);
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn header(msg: &Message) -> String {
    let role = match msg.role {
        Role::User => "you",
        Role::System => "system",
    };
    let pin = if msg.pinned { " *" } else { "" };
    format!("[{}{}] {} ({})", short_id(&msg.id), pin, role, msg.kind)
}

fn body(msg: &Message) -> String {
    match msg.kind.render_hint() {
        RenderHint::InlineImage =>
            match msg.binary_len() {
                Some(len) => format!("<{} image, {} bytes>", msg.kind, len),
                None => format!("<{} image, undecodable>", msg.kind),
            }
        _ => msg.text.clone(),
    }
}

/// Turns successive views into printable lines, emitting only what changed.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashMap<String, (usize, bool)>,
    waiting: WaitingState,
    connection: Option<ConnectionState>,
    banner: Option<String>,
}

impl Renderer {
    pub fn diff(&mut self, view: &TimelineView) -> Vec<String> {
        let mut out = Vec::new();

        if self.connection != Some(view.connection) {
            out.push(format!("-- connection {}", view.connection));
            self.connection = Some(view.connection);
        }

        if view.messages.is_empty() && !self.printed.is_empty() {
            out.push("-- timeline cleared".to_string());
            self.printed.clear();
        }

        for msg in view.display_order() {
            match self.printed.get(&msg.id).copied() {
                None => {
                    out.push(format!("{}\n{}", header(msg), body(msg)));
                }
                Some((len, pinned)) => {
                    if pinned != msg.pinned {
                        let verb = if msg.pinned { "pinned" } else { "unpinned" };
                        out.push(format!("-- {} {}", verb, short_id(&msg.id)));
                    }
                    if msg.text.len() > len && msg.kind.render_hint() != RenderHint::InlineImage {
                        match msg.text.get(len..) {
                            Some(delta) => out.push(delta.to_string()),
                            None => out.push(format!("{}\n{}", header(msg), body(msg))),
                        }
                    }
                }
            }
            self.printed.insert(msg.id.clone(), (msg.text.len(), msg.pinned));
        }

        if self.waiting != view.waiting {
            out.push(format!("-- {}", view.waiting));
            self.waiting = view.waiting;
        }

        let banner = view.typing_banner();
        if self.banner != banner {
            if let Some(text) = &banner {
                out.push(format!("-- {}", text));
            }
            self.banner = banner;
        }

        out
    }
}

/// Prints view changes until the controller drops its sender.
pub async fn render(mut views: watch::Receiver<TimelineView>) {
    let mut renderer = Renderer::default();
    loop {
        let lines = renderer.diff(&views.borrow_and_update());
        for line in lines {
            println!("{}", line);
        }
        if views.changed().await.is_err() {
            break;
        }
    }
}
