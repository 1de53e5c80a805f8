mod client;
mod recorder;
mod session;

use anyhow::Result;
use client::{audio_url, BackendClient, ClientEvent, ConnectionStatus};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use recorder::Recording;
use session::Session;
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tysva_shared::ChatResponse;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7999";

/// What the chat pane shows. The session keeps the history sent to the
/// server; this keeps how it is displayed.
enum Transcript {
    System(String),
    User(String),
    File(String),
    Reply {
        process: String,
        response: String,
        audio_url: Option<String>,
    },
}

struct App {
    session: Session,
    transcript: Vec<Transcript>,
    input: String,
    scroll: u16,
    voice_enabled: bool,
    show_process: bool,
    waiting: bool,
    connection_status: ConnectionStatus,
    recording: Option<Recording>,
    recordings_dir: PathBuf,
}

enum Command {
    Send(String),
    QueueFile(String),
    Flush,
}

fn parse_input(input: &str) -> Command {
    let trimmed = input.trim();
    if let Some(path) = trimmed.strip_prefix("/file ") {
        return Command::QueueFile(path.trim().to_string());
    }
    if trimmed.is_empty() {
        Command::Flush
    } else {
        Command::Send(input.to_string())
    }
}

impl App {
    fn new() -> Self {
        Self {
            session: Session::new(),
            transcript: vec![Transcript::System(
                "Welcome to TySVA! Ask anything about TypeScript, record a question with Ctrl-R, \
                 or queue an audio file with /file <path>."
                    .to_string(),
            )],
            input: String::new(),
            scroll: 0,
            voice_enabled: false,
            show_process: false,
            waiting: false,
            connection_status: ConnectionStatus::Disconnected,
            recording: None,
            recordings_dir: std::env::temp_dir().join("tysva-recordings"),
        }
    }

    fn notice(&mut self, content: impl Into<String>) {
        self.transcript.push(Transcript::System(content.into()));
    }

    fn submit(&mut self, client: &BackendClient) {
        if self.waiting {
            self.notice("Still waiting for the previous answer.");
            return;
        }
        let input = std::mem::take(&mut self.input);
        match parse_input(&input) {
            Command::QueueFile(path) => {
                self.queue_file(&path);
                return;
            }
            Command::Send(text) => {
                self.session.push_text(text.clone());
                self.transcript.push(Transcript::User(text));
            }
            Command::Flush => {}
        }

        let Some(request) = self.session.next_request(self.voice_enabled) else {
            return;
        };
        match client.send(request) {
            Ok(()) => self.waiting = true,
            Err(e) => {
                self.session.discard_pending();
                self.notice(format!("Failed to send message: {}", e));
            }
        }
    }

    /// The server opens the file itself, so only absolute paths to existing
    /// files are queued.
    fn queue_file(&mut self, raw: &str) {
        match std::fs::canonicalize(raw) {
            Ok(path) if path.is_file() => {
                let path = path.to_string_lossy().into_owned();
                self.session.push_file(path.clone());
                self.transcript.push(Transcript::File(path));
            }
            Ok(path) => self.notice(format!("{} is not a file", path.display())),
            Err(e) => self.notice(format!("Cannot queue {}: {}", raw, e)),
        }
    }

    /// First press starts the microphone, second press stops it and queues
    /// the recording.
    fn toggle_recording(&mut self) {
        match self.recording.take() {
            None => match Recording::start(&self.recordings_dir) {
                Ok(recording) => self.recording = Some(recording),
                Err(e) => self.notice(format!("Could not start recording: {}", e)),
            },
            Some(recording) => match recording.stop() {
                Ok(path) => self.queue_file(&path.to_string_lossy()),
                Err(e) => self.notice(format!("Recording failed: {}", e)),
            },
        }
    }

    fn receive(&mut self, response: ChatResponse, base_url: &str) {
        self.waiting = false;
        self.session.record_exchange(&response.process, &response.response);
        self.transcript.push(Transcript::Reply {
            process: response.process,
            response: response.response,
            audio_url: response.audio_file.map(|f| audio_url(base_url, &f)),
        });
    }

    fn fail(&mut self, message: String) {
        self.waiting = false;
        self.session.discard_pending();
        self.notice(message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to a file so they do not corrupt the TUI
    if let Ok(file) = std::fs::File::create("tysva-cli.log") {
        tracing_subscriber::fmt().with_writer(file).with_ansi(false).init();
    }
    dotenv::dotenv().ok();

    let server_url = std::env::var("TYSVA_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    tracing::info!("Session {} talking to {}", app.session.id, server_url);
    let (client, mut event_rx, mut status_rx) = BackendClient::new(server_url);

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if ui_tx.send(event).is_err() {
                break;
            }
        }
    });

    let res = run_app(&mut terminal, &mut app, client, &mut event_rx, &mut status_rx, &mut ui_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    tracing::info!(
        "Session {} ended with {} messages",
        app.session.id,
        app.session.chat_history().len()
    );

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    client: BackendClient,
    event_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    status_rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>,
    ui_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            Some(event) = ui_rx.recv() => {
                let Event::Key(key) = event else { continue };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                match key.code {
                    KeyCode::Char('q') if ctrl => return Ok(()),
                    KeyCode::Char('v') if ctrl => {
                        app.voice_enabled = !app.voice_enabled;
                    }
                    KeyCode::Char('t') if ctrl => {
                        app.show_process = !app.show_process;
                    }
                    KeyCode::Char('r') if ctrl => app.toggle_recording(),
                    KeyCode::Char(c) => app.input.push(c),
                    KeyCode::Backspace => {
                        app.input.pop();
                    }
                    KeyCode::Enter => app.submit(&client),
                    KeyCode::Up => app.scroll = app.scroll.saturating_add(1),
                    KeyCode::Down => app.scroll = app.scroll.saturating_sub(1),
                    _ => {}
                }
            }
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Response(response) => app.receive(response, client.base_url()),
                    ClientEvent::Failed(message) => app.fail(message),
                }
            }
            Some(status) = status_rx.recv() => {
                app.connection_status = status;
            }
        }
    }
}

fn transcript_lines<'a>(item: &'a Transcript, show_process: bool) -> Vec<Line<'a>> {
    let header = |label: &'a str, color: Color| {
        Line::from(Span::styled(
            label,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
    };
    let mut lines = Vec::new();
    match item {
        Transcript::System(content) => {
            lines.push(header("System:", Color::Yellow));
            lines.extend(content.lines().map(Line::from));
        }
        Transcript::User(content) => {
            lines.push(header("You:", Color::Cyan));
            lines.extend(content.lines().map(Line::from));
        }
        Transcript::File(path) => {
            lines.push(header("You (audio):", Color::Cyan));
            lines.push(Line::from(Span::styled(path.as_str(), Style::default().fg(Color::DarkGray))));
        }
        Transcript::Reply {
            process,
            response,
            audio_url,
        } => {
            lines.push(header("Assistant:", Color::Green));
            if !process.is_empty() {
                let dim = Style::default().fg(Color::DarkGray);
                if show_process {
                    lines.push(Line::from(Span::styled("▾ Agentic Process", dim)));
                    lines.extend(process.lines().map(|l| Line::from(Span::styled(l, dim))));
                } else {
                    lines.push(Line::from(Span::styled("▸ Agentic Process (Ctrl-T to expand)", dim)));
                }
            }
            lines.extend(response.lines().map(Line::from));
            if let Some(url) = audio_url {
                lines.push(Line::from(Span::styled(
                    format!("🔊 {}", url),
                    Style::default().fg(Color::Magenta),
                )));
            }
        }
    }
    lines.push(Line::from(""));
    lines
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(3)])
        .split(f.area());

    let (status_text, status_color) = match &app.connection_status {
        ConnectionStatus::Connected => ("● Connected".to_string(), Color::Green),
        ConnectionStatus::Waiting => ("● Thinking...".to_string(), Color::Yellow),
        ConnectionStatus::Disconnected => ("● Disconnected".to_string(), Color::Red),
        ConnectionStatus::Error(e) => (format!("● Error: {}", e), Color::Red),
    };
    let voice = if app.voice_enabled { "voice on" } else { "voice off" };
    let rec = if app.recording.is_some() { "  |  ● REC (Ctrl-R to stop)" } else { "" };
    let status = Paragraph::new(format!("{}  |  {}{}", status_text, voice, rec)).style(Style::default().fg(status_color));
    f.render_widget(status, chunks[0]);

    let mut items: Vec<ListItem> = app
        .transcript
        .iter()
        .map(|item| ListItem::new(transcript_lines(item, app.show_process)))
        .collect();
    if app.waiting {
        items.push(ListItem::new(Line::from(Span::styled(
            "●●●",
            Style::default().fg(Color::Green),
        ))));
    }
    let skip = (app.scroll as usize).min(items.len().saturating_sub(1));
    let visible: Vec<ListItem> = items.into_iter().skip(skip).collect();

    let messages = List::new(visible).block(Block::default().borders(Borders::ALL).title("Chat"));
    f.render_widget(messages, chunks[1]);

    let input = Paragraph::new(app.input.as_str())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Input (Enter send, /file <path>, Ctrl-R record, Ctrl-V voice, Ctrl-T process, Ctrl-Q quit)"),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(input, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_command_is_recognised() {
        assert!(matches!(parse_input("/file  /tmp/q.mp3 "), Command::QueueFile(p) if p == "/tmp/q.mp3"));
        assert!(matches!(parse_input("how do generics work?"), Command::Send(_)));
        assert!(matches!(parse_input("   "), Command::Flush));
    }

    #[test]
    fn collapsed_reply_hides_process() {
        let reply = Transcript::Reply {
            process: "Calling tool **deepsearch_tool**".into(),
            response: "Use `unknown`.".into(),
            audio_url: Some("http://127.0.0.1:7999/audio/a.mp3".into()),
        };
        let collapsed: Vec<String> = transcript_lines(&reply, false).iter().map(|l| l.to_string()).collect();
        assert!(collapsed.iter().any(|l| l.contains("Agentic Process")));
        assert!(!collapsed.iter().any(|l| l.contains("deepsearch_tool")));
        assert!(collapsed.iter().any(|l| l.contains("/audio/a.mp3")));

        let expanded: Vec<String> = transcript_lines(&reply, true).iter().map(|l| l.to_string()).collect();
        assert!(expanded.iter().any(|l| l.contains("deepsearch_tool")));
    }

    #[test]
    fn reply_is_recorded_in_session() {
        let mut app = App::new();
        app.session.push_text("q");
        app.waiting = true;
        app.receive(
            ChatResponse {
                response: "a".into(),
                process: String::new(),
                audio_file: Some("audio/x.mp3".into()),
            },
            "http://h:1",
        );
        assert!(!app.waiting);
        assert!(!app.session.has_pending());
        assert!(matches!(
            app.transcript.last(),
            Some(Transcript::Reply { audio_url: Some(u), .. }) if u == "http://h:1/audio/x.mp3"
        ));
    }

    #[test]
    fn queued_files_are_sent_as_absolute_paths() {
        let clip = tempfile::Builder::new().suffix(".mp3").tempfile_in(".").unwrap();
        let relative = clip.path().file_name().unwrap().to_string_lossy().into_owned();

        let mut app = App::new();
        app.queue_file(&relative);

        let request = app.session.next_request(false).unwrap();
        let sent = PathBuf::from(request.file.unwrap());
        assert!(sent.is_absolute());
        assert_eq!(sent, std::fs::canonicalize(clip.path()).unwrap());
    }

    #[test]
    fn missing_file_is_not_queued() {
        let mut app = App::new();
        app.queue_file("definitely/not/here.mp3");

        assert!(!app.session.has_pending());
        assert!(matches!(app.transcript.last(), Some(Transcript::System(m)) if m.contains("not/here.mp3")));
    }

    #[test]
    fn directory_is_not_queued() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new();
        app.queue_file(&dir.path().to_string_lossy());
        assert!(!app.session.has_pending());
    }

    #[test]
    fn failure_discards_pending_turns() {
        let mut app = App::new();
        app.session.push_text("q");
        app.waiting = true;
        app.fail("Server error 500: boom".into());
        assert!(!app.waiting);
        assert!(app.session.next_request(false).is_none());
    }
}
