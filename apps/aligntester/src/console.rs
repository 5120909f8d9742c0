//! Raw-mode operator console: one status screen plus single-key commands.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use align_sync::{
    route_key, AlignClient, ChannelStatus, Command, Dispatched, Focus, Mode, SessionView, SubMode,
    SwitchOutcome, SyncResult,
};

use crate::error::CliError;

const HISTORY_ROWS: usize = 5;
const KEY_HELP: &str =
    "space start/stop  +/- step  1-8 jump  h head  r recal  a analyze  tab mode  f format  m sub-mode  x reset  q quit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    ToggleMode,
    NextFormat,
    NextSubMode,
    ResetData,
    Key(char),
    Ignore,
}

fn classify(key: &KeyEvent) -> Input {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Input::Quit,
            _ => Input::Ignore,
        };
    }
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => Input::Quit,
        KeyCode::Tab => Input::ToggleMode,
        KeyCode::Char('f') => Input::NextFormat,
        KeyCode::Char('m') => Input::NextSubMode,
        KeyCode::Char('x') => Input::ResetData,
        KeyCode::Char(c) => Input::Key(c),
        _ => Input::Ignore,
    }
}

/// What a key press asks for, decided against the current view.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Quit,
    Switch(Mode),
    Run(Command),
    Nothing,
}

fn decide(view: &SessionView, formats: &[String], input: Input) -> Action {
    match input {
        Input::Quit => Action::Quit,
        Input::Ignore => Action::Nothing,
        Input::ToggleMode => Action::Switch(view.mode.map_or(Mode::Manual, Mode::other)),
        Input::NextFormat => next_format(formats, view.format())
            .map_or(Action::Nothing, |format| Action::Run(Command::SetFormat(format))),
        Input::NextSubMode => Action::Run(Command::SetSubMode(
            view.sub_mode().map_or(SubMode::Direct, SubMode::next),
        )),
        Input::ResetData => Action::Run(Command::ResetData),
        Input::Key(c) if view.mode == Some(Mode::Manual) => {
            route_key(view, c, Focus::Controls).map_or(Action::Nothing, Action::Run)
        }
        Input::Key(c) => {
            debug!(target: "aligntester::console", key = %c, "manual controls inactive");
            Action::Nothing
        }
    }
}

fn next_format(formats: &[String], current: &str) -> Option<String> {
    if formats.is_empty() {
        return None;
    }
    let next = match formats.iter().position(|name| name == current) {
        Some(index) => (index + 1) % formats.len(),
        None => 0,
    };
    Some(formats[next].clone())
}

fn describe_switch(outcome: &SwitchOutcome) -> String {
    match outcome {
        SwitchOutcome::Initialized(mode) => format!("{mode} mode"),
        SwitchOutcome::Unchanged(mode) => format!("already in {mode} mode"),
        SwitchOutcome::Transitioned(report) if report.synced => {
            format!("switched to {} mode", report.to)
        }
        SwitchOutcome::Transitioned(report) => {
            format!("switched to {} mode; settings not synchronized", report.to)
        }
    }
}

fn describe_result(label: &str, result: SyncResult<Dispatched>) -> String {
    match result {
        Ok(Dispatched::Sent) => format!("{label}: ok"),
        Ok(Dispatched::Skipped) => format!("{label}: ignored"),
        Err(err) => format!("{label}: {err}"),
    }
}

fn render(view: &SessionView, status: ChannelStatus, message: Option<&str>) -> Vec<String> {
    let mode = view.mode.map_or_else(|| "-".to_string(), |mode| mode.to_string());
    let mut lines = vec![format!("aligntester  [{mode}]  push: {status:?}").to_lowercase()];

    let session = if view.running() { "running" } else { "stopped" };
    lines.push(format!(
        "session   : {session} at {} ({:?})",
        view.position, view.position_source
    ));

    let sub_mode = match (view.sub_mode(), view.sub_mode_config()) {
        (Some(sub_mode), Some(config)) => format!(
            "{sub_mode} ({} reads, {} ms delay, ~{} ms)",
            config.reads, config.delay_ms, config.estimated_latency_ms
        ),
        _ => "-".to_string(),
    };
    lines.push(format!("format    : {}   sub-mode: {sub_mode}", view.format()));

    let activity = match (view.analyzing, view.busy) {
        (true, _) => "analyzing",
        (false, true) => "reading",
        (false, false) => "idle",
    };
    lines.push(format!("activity  : {activity}"));

    if let Some(reading) = &view.state.last_reading {
        let quality = reading
            .quality
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        lines.push(format!(
            "last      : {}  {:.1}%  {quality}  {}/{} sectors",
            reading.position(),
            reading.percentage,
            reading.sectors_detected,
            reading.sectors_expected
        ));
    }

    if !view.readings.is_empty() {
        let mut live = format!("live      : {} readings", view.readings.len());
        if let Some(avg) = view.stats.average_duration_ms {
            live.push_str(&format!(", {avg:.0} ms/read"));
        }
        if let Some(avg) = view.stats.average_latency_ms {
            live.push_str(&format!(", {avg:.0} ms apart"));
        }
        lines.push(live);
        for entry in view.readings.iter().rev().take(HISTORY_ROWS) {
            let state = if entry.completed { "done" } else { "pending" };
            lines.push(format!(
                "  #{:<3} {}  {:>5.1}%  {state}",
                entry.seq,
                entry.reading.position(),
                entry.reading.percentage
            ));
        }
    }

    lines.push(String::new());
    lines.push(KEY_HELP.to_string());
    if let Some(message) = message {
        lines.push(message.to_string());
    }
    lines
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter(out: &mut impl Write) -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = Self;
        execute!(out, EnterAlternateScreen, Hide)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Blocking crossterm reads live on their own thread.
fn spawn_key_reader(tx: mpsc::UnboundedSender<KeyEvent>, stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "aligntester::console", error = %err, "key read failed");
                        break;
                    }
                },
                Ok(false) => {}
                Err(err) => {
                    warn!(target: "aligntester::console", error = %err, "key poll failed");
                    break;
                }
            }
        }
    });
}

pub struct Console {
    client: AlignClient,
    formats: Vec<String>,
    message: Option<String>,
}

impl Console {
    pub async fn open(client: AlignClient) -> Self {
        let formats = match client.list_formats().await {
            Ok(formats) => formats.into_iter().map(|format| format.name).collect(),
            Err(err) => {
                warn!(target: "aligntester::console", error = %err, "format list unavailable");
                Vec::new()
            }
        };
        Self {
            client,
            formats,
            message: None,
        }
    }

    /// Commands and mode switches run on their own tasks so the screen keeps
    /// following the session while the backend works.
    pub async fn run(mut self) -> Result<AlignClient, CliError> {
        let mut out = io::stdout();
        let _terminal = TerminalGuard::enter(&mut out)?;

        let (tx, mut keys) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        spawn_key_reader(tx, Arc::clone(&stop));

        let mut views = self.client.subscribe();
        let mut status = self.client.push_status();
        let mut in_flight: JoinSet<String> = JoinSet::new();
        let result = loop {
            let view = views.borrow_and_update().clone();
            let lines = render(&view, *status.borrow_and_update(), self.message.as_deref());
            if let Err(err) = draw(&mut out, &lines) {
                break Err(err.into());
            }
            tokio::select! {
                key = keys.recv() => {
                    let Some(key) = key else { break Ok(()) };
                    let action = decide(&self.client.view(), &self.formats, classify(&key));
                    if !self.launch(action, &mut in_flight) {
                        break Ok(());
                    }
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => match done {
                    Ok(message) => self.message = Some(message),
                    Err(err) => warn!(target: "aligntester::console", error = %err, "command task failed"),
                },
                changed = views.changed() => if changed.is_err() { break Ok(()) },
                changed = status.changed() => if changed.is_err() { break Ok(()) },
            }
        };
        stop.store(true, Ordering::Relaxed);
        in_flight.shutdown().await;
        result.map(|()| self.client)
    }

    /// Returns false when the operator asked to quit.
    fn launch(&mut self, action: Action, in_flight: &mut JoinSet<String>) -> bool {
        let controls = self.client.controls();
        match action {
            Action::Quit => return false,
            Action::Nothing => {}
            Action::Switch(mode) => {
                self.message = Some(format!("switching to {mode} mode"));
                in_flight.spawn(async move { describe_switch(&controls.switch_mode(mode).await) });
            }
            Action::Run(command) => {
                let label = command.to_string();
                self.message = Some(format!("{label}: sent"));
                in_flight.spawn(async move {
                    let result = controls.execute(command).await;
                    describe_result(&label, result)
                });
            }
        }
        true
    }
}

fn draw(out: &mut impl Write, lines: &[String]) -> io::Result<()> {
    queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    for line in lines {
        write!(out, "{line}\r\n")?;
    }
    out.flush()
}
