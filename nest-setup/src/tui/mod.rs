//! TUI module - the hosted engine setup page.
//!
//! Terminal lifecycle plus the event loop: draw, poll input with a timeout,
//! drain the download worker's channels, repeat. The worker never touches a
//! widget; everything it reports arrives here as channel messages.

pub mod page;
mod ui;

use crate::cli::Cli;
use anyhow::Result;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use page::{App, InputResult, PageContext};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// What the page session ended with.
pub enum PageOutcome {
    Quit,
    /// Operator confirmed; the caller launches the setup tool against this
    /// answer file once the terminal is restored.
    RunSetup(PathBuf),
}

pub fn ensure_interactive_terminal() -> Result<()> {
    use std::io::IsTerminal;

    if std::io::stdout().is_terminal() {
        return Ok(());
    }
    anyhow::bail!(
        "No TTY detected. The setup console requires an interactive terminal.\n\
         Try running directly in a terminal (not piped or via script).\n\
         If using sudo, try: sudo -E nest"
    );
}

/// Run the setup page until the operator quits or confirms setup.
pub fn run(cli: &Cli, engine_status_line: String) -> Result<PageOutcome> {
    ensure_interactive_terminal()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(PageContext::from_cli(cli), engine_status_line);
    let outcome = run_loop(&mut terminal, &mut app);

    // Restore the terminal before reporting any error from the loop.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    outcome
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<PageOutcome> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match app.handle_input(key) {
                    InputResult::Quit => {
                        app.shutdown();
                        return Ok(PageOutcome::Quit);
                    }
                    InputResult::RunSetup => {
                        let answers = app.answers_path().to_path_buf();
                        app.shutdown();
                        return Ok(PageOutcome::RunSetup(answers));
                    }
                    InputResult::Continue => {}
                }
            }
        }

        app.tick();
    }
}
