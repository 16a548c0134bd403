//! Terminal front end
//!
//! Owns the terminal while the app runs. Key presses become session commands;
//! session snapshots arriving on the broadcast channel trigger a redraw.

mod input;
mod palette;
mod ui;

use crate::prefs::{PreferenceStore, Theme};
use crate::runtime::{HandleError, SessionHandle, SessionSnapshot};
use crate::tracker::{ConfirmationPolicy, Decision};
use crossterm::event::{Event, EventStream, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use futures::StreamExt;
use input::Action;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("Terminal error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Session(#[from] HandleError),
}

type Tui = Terminal<CrosstermBackend<Stdout>>;

fn setup_terminal() -> io::Result<Tui> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Tui) -> io::Result<()> {
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

type PanicHook = Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Restores the terminal before a panic message is printed; reinstates the
/// previous hook on drop.
struct PanicGuard {
    original: Option<PanicHook>,
}

impl PanicGuard {
    fn install() -> Self {
        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(|info| {
            let _ = terminal::disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            eprintln!("{info}");
        }));
        Self {
            original: Some(original),
        }
    }
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.original.take() {
            let _ = std::panic::take_hook();
            std::panic::set_hook(hook);
        }
    }
}

/// UI state that is not part of the session
pub struct App {
    handle: SessionHandle,
    snapshot: SessionSnapshot,
    policy: Arc<ConfirmationPolicy>,
    prefs: Arc<dyn PreferenceStore>,
    theme: Theme,
    /// Local copy of the draft so typing never waits on the runtime
    draft: String,
    api_key_missing: bool,
    /// Last rejected action, shown in the status line
    notice: Option<String>,
    /// Rows scrolled up from the bottom
    scroll_back: usize,
    max_scroll: usize,
    quit: bool,
}

impl App {
    pub async fn new(
        handle: SessionHandle,
        policy: Arc<ConfirmationPolicy>,
        prefs: Arc<dyn PreferenceStore>,
        api_key_missing: bool,
    ) -> Result<Self, TuiError> {
        let snapshot = handle.snapshot().await?;
        let theme = Theme::load(prefs.as_ref());
        Ok(Self {
            draft: snapshot.draft_input.clone(),
            handle,
            snapshot,
            policy,
            prefs,
            theme,
            api_key_missing,
            notice: None,
            scroll_back: 0,
            max_scroll: 0,
            quit: false,
        })
    }

    async fn on_key(&mut self, key: KeyEvent) -> Result<(), TuiError> {
        let awaiting = !self.snapshot.status.accepts_input();
        let action = input::map_key(key, awaiting);
        if !matches!(action, Action::Ignore | Action::ScrollUp | Action::ScrollDown) {
            self.notice = None;
        }

        match action {
            Action::Quit => self.quit = true,
            Action::Insert(c) => {
                self.draft.push(c);
                self.handle.set_draft(self.draft.clone()).await?;
            }
            Action::Backspace => {
                self.draft.pop();
                self.handle.set_draft(self.draft.clone()).await?;
            }
            Action::Send => self.send().await?,
            Action::Stop => self.handle.stop().await?,
            Action::Clear => {
                self.handle.clear().await?;
                self.scroll_back = 0;
            }
            Action::ToggleTheme => {
                self.theme = self.theme.toggled();
                if let Err(e) = self.theme.save(self.prefs.as_ref()) {
                    tracing::warn!(error = %e, "Failed to save theme");
                    self.notice = Some(e.to_string());
                }
            }
            Action::Approve => self.resolve_first(Decision::Approve).await?,
            Action::Deny => self.resolve_first(Decision::Deny).await?,
            Action::ScrollUp => {
                self.scroll_back = (self.scroll_back + 3).min(self.max_scroll);
            }
            Action::ScrollDown => self.scroll_back = self.scroll_back.saturating_sub(3),
            Action::Ignore => {}
        }
        Ok(())
    }

    async fn send(&mut self) -> Result<(), TuiError> {
        match self.handle.send(self.draft.clone()).await {
            Ok(turn_id) => {
                tracing::debug!(turn_id = %turn_id, "Message sent");
                self.draft.clear();
                self.scroll_back = 0;
                Ok(())
            }
            Err(HandleError::Session(e)) => {
                self.notice = Some(e.to_string());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_first(&mut self, decision: Decision) -> Result<(), TuiError> {
        let Some(call_id) = self.snapshot.pending.first().cloned() else {
            return Ok(());
        };
        match self
            .handle
            .resolve_confirmation(call_id.as_str(), decision, None)
            .await
        {
            Ok(()) => Ok(()),
            Err(HandleError::Session(e)) if e.is_stale_resolution() => {
                tracing::debug!(call_id = %call_id, error = %e, "Stale confirmation ignored");
                Ok(())
            }
            Err(HandleError::Session(e)) => {
                self.notice = Some(e.to_string());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Run the terminal UI until the user quits
pub async fn run(mut app: App) -> Result<(), TuiError> {
    tracing::info!("Starting terminal UI");
    let _panic_guard = PanicGuard::install();
    let mut terminal = setup_terminal()?;

    let mut snapshots = app.handle.subscribe();
    let mut reader = EventStream::new();
    let result = event_loop(&mut terminal, &mut app, &mut snapshots, &mut reader).await;

    restore_terminal(&mut terminal)?;
    tracing::info!("Terminal UI stopped");
    result
}

async fn event_loop(
    terminal: &mut Tui,
    app: &mut App,
    snapshots: &mut broadcast::Receiver<SessionSnapshot>,
    reader: &mut EventStream,
) -> Result<(), TuiError> {
    loop {
        terminal.draw(|frame| ui::draw(frame, app))?;
        if app.quit {
            return Ok(());
        }

        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => app.snapshot = snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Snapshot receiver lagged");
                    app.snapshot = app.handle.snapshot().await?;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            event = reader.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    app.on_key(key).await?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }
    }
}
