//! Page state machine for the hosted engine setup console.
//!
//! All state is instance-scoped and owned by the UI thread. A running
//! download talks to the page only through its channels; `tick` drains them
//! once per event-loop pass.

use crate::cli::Cli;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use nest_core::download::{
    self, DownloadHandle, DownloadRequest, DownloadedImage, TransferSnapshot, TransferStatus,
};
use nest_core::engine_config::{self, BootMode};
use nest_core::settings::HostedEngineDefaults;
use nest_core::vm_conf;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

/// Which widget owns the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Url,
    Pxe,
    Setup,
}

impl Field {
    fn next(self) -> Field {
        match self {
            Field::Url => Field::Pxe,
            Field::Pxe => Field::Setup,
            Field::Setup => Field::Url,
        }
    }

    fn prev(self) -> Field {
        match self {
            Field::Url => Field::Setup,
            Field::Pxe => Field::Url,
            Field::Setup => Field::Pxe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    /// The answer file is written; Enter leaves the console and runs setup.
    Ready,
    /// Operator-visible notice; Enter dismisses it.
    Notice(String),
}

pub enum InputResult {
    Continue,
    Quit,
    RunSetup,
}

/// Paths the page works against; separated from `Cli` so tests can point
/// everything at a temp directory.
pub struct PageContext {
    pub setup_dir: PathBuf,
    pub answers_path: PathBuf,
    pub defaults_file: PathBuf,
    pub vm_conf: PathBuf,
}

impl PageContext {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            setup_dir: cli.setup_dir.clone(),
            answers_path: cli.answers_path(),
            defaults_file: cli.defaults_file.clone(),
            vm_conf: cli.vm_conf.clone(),
        }
    }
}

pub struct App {
    ctx: PageContext,
    defaults: HostedEngineDefaults,

    pub configured: bool,
    pub vm_name: Option<String>,
    pub engine_status_line: String,

    pub url_input: String,
    pub pxe: bool,
    pub focus: Field,

    pub status_message: String,
    pub dialog: Option<Dialog>,
    pub transfer: Option<TransferSnapshot>,
    pub downloading: bool,

    handle: Option<DownloadHandle>,
    progress_rx: Option<Receiver<TransferSnapshot>>,
    completion_rx: Option<Receiver<DownloadedImage>>,
}

impl App {
    pub fn new(ctx: PageContext, engine_status_line: String) -> Self {
        let defaults = HostedEngineDefaults::load(&ctx.defaults_file).unwrap_or_else(|err| {
            log::warn!("failed to load hosted engine defaults: {:#}", err);
            HostedEngineDefaults::default()
        });
        let configured = vm_conf::is_configured(&ctx.vm_conf);
        let vm_name = if configured {
            vm_conf::vm_name(&ctx.vm_conf)
        } else {
            None
        };
        let status_message = if configured && !defaults.force_enable {
            "ℹ️ Hosted engine is already configured.".to_string()
        } else {
            "Tab moves between fields; Enter on the button starts setup.".to_string()
        };

        Self {
            url_input: defaults.image_path.clone(),
            pxe: defaults.pxe,
            defaults,
            ctx,
            configured,
            vm_name,
            engine_status_line,
            focus: Field::Url,
            status_message,
            dialog: None,
            transfer: None,
            downloading: false,
            handle: None,
            progress_rx: None,
            completion_rx: None,
        }
    }

    pub fn answers_path(&self) -> &Path {
        &self.ctx.answers_path
    }

    pub fn handle_input(&mut self, key: KeyEvent) -> InputResult {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            if self.downloading {
                self.request_cancel();
                return InputResult::Continue;
            }
            return InputResult::Quit;
        }

        if let Some(dialog) = self.dialog.clone() {
            return match (dialog, key.code) {
                (Dialog::Ready, KeyCode::Enter) => InputResult::RunSetup,
                (_, KeyCode::Enter | KeyCode::Esc) => {
                    self.dialog = None;
                    InputResult::Continue
                }
                _ => InputResult::Continue,
            };
        }

        match key.code {
            KeyCode::Esc => {
                if self.downloading {
                    self.request_cancel();
                    InputResult::Continue
                } else {
                    InputResult::Quit
                }
            }
            KeyCode::Tab => {
                self.focus = self.focus.next();
                InputResult::Continue
            }
            KeyCode::BackTab => {
                self.focus = self.focus.prev();
                InputResult::Continue
            }
            KeyCode::Enter => {
                match self.focus {
                    Field::Setup => self.on_setup(),
                    Field::Pxe => self.pxe = !self.pxe,
                    Field::Url => self.focus = Field::Pxe,
                }
                InputResult::Continue
            }
            KeyCode::Char(' ') if self.focus == Field::Pxe => {
                self.pxe = !self.pxe;
                InputResult::Continue
            }
            KeyCode::Char(c) if self.focus == Field::Url => {
                self.url_input.push(c);
                InputResult::Continue
            }
            KeyCode::Backspace if self.focus == Field::Url => {
                self.url_input.pop();
                InputResult::Continue
            }
            _ => InputResult::Continue,
        }
    }

    /// The Setup action: persist the operator's inputs, validate them, then
    /// either write the answer file directly or start a download worker.
    pub fn on_setup(&mut self) {
        if self.downloading {
            return;
        }

        let image = self.url_input.trim().to_string();
        self.defaults.image_path = image.clone();
        self.defaults.pxe = self.pxe;
        if let Err(err) = self.defaults.store(&self.ctx.defaults_file) {
            log::warn!("failed to persist hosted engine defaults: {:#}", err);
        }

        if image.is_empty() && !self.pxe {
            self.notice("You must enter a URL or choose PXE to install the Engine VM");
            return;
        }
        if !image.is_empty() && self.pxe {
            self.notice("Please choose either PXE or an image to retrieve, not both");
            return;
        }

        if self.pxe {
            self.finish_with_mode(&BootMode::Pxe);
            return;
        }

        // Creating the image directory is the page's job, not the worker's.
        if let Err(err) = fs::create_dir_all(&self.ctx.setup_dir) {
            self.notice(&format!(
                "Cannot create {}: {}",
                self.ctx.setup_dir.display(),
                err
            ));
            return;
        }

        // A previous run may have left the image fully downloaded; reuse it
        // without another transfer.
        let name = image.rsplit('/').next().unwrap_or_default();
        let local = self.ctx.setup_dir.join(name);
        if !name.is_empty() && local.exists() {
            match engine_config::classify_image(&local) {
                Ok(mode) => self.finish_with_mode(&mode),
                Err(err) => self.notice(&err.to_string()),
            }
            return;
        }

        match url::Url::parse(&image) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                self.start_download(image)
            }
            _ => self.notice("Couldn't parse URL, please check it manually."),
        }
    }

    fn finish_with_mode(&mut self, mode: &BootMode) {
        match engine_config::write_answers(&self.ctx.answers_path, mode) {
            Ok(()) => {
                self.status_message = "✅ Setup configuration written.".to_string();
                self.dialog = Some(Dialog::Ready);
            }
            Err(err) => self.notice(&err.to_string()),
        }
    }

    fn start_download(&mut self, url: String) {
        let request = DownloadRequest::new(
            url,
            self.ctx.setup_dir.clone(),
            self.ctx.answers_path.clone(),
        );
        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        self.handle = Some(download::spawn(request, progress_tx, completion_tx));
        self.progress_rx = Some(progress_rx);
        self.completion_rx = Some(completion_rx);
        self.transfer = None;
        self.downloading = true;
        self.status_message = "⬇️ Downloading engine image...".to_string();
    }

    pub fn request_cancel(&mut self) {
        if let Some(handle) = &self.handle {
            handle.cancel();
            self.status_message = "🛑 Cancelling download...".to_string();
        }
    }

    /// Drain the worker channels. The last snapshot wins; a terminal one
    /// ends the transfer and surfaces its outcome.
    pub fn tick(&mut self) {
        let snapshots: Vec<TransferSnapshot> = self
            .progress_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for snapshot in snapshots {
            let status = snapshot.status;
            let last_error = snapshot.last_error.clone();
            self.transfer = Some(snapshot);
            if status.is_terminal() {
                self.downloading = false;
                self.handle = None;
                self.progress_rx = None;
                match status {
                    TransferStatus::Failed => self.notice(
                        &last_error.unwrap_or_else(|| "Error Downloading ISO/OVA Image!".to_string()),
                    ),
                    TransferStatus::Cancelled => {
                        self.status_message = "🛑 Download cancelled.".to_string();
                    }
                    _ => {}
                }
            }
        }

        let images: Vec<DownloadedImage> = self
            .completion_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        if let Some(image) = images.into_iter().last() {
            log::info!("Engine image ready at {}", image.path.display());
            self.status_message = "✅ Download complete.".to_string();
            self.dialog = Some(Dialog::Ready);
            self.completion_rx = None;
        }
    }

    /// Cancel any active transfer and give the worker a moment to remove
    /// its partial file; a stalled socket read must not hold the console
    /// open forever.
    pub fn shutdown(&mut self) {
        self.progress_rx = None;
        self.completion_rx = None;
        if let Some(handle) = self.handle.take() {
            handle.cancel();
            for _ in 0..20 {
                if handle.is_finished() {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
            if handle.is_finished() {
                handle.join();
            } else {
                log::warn!("download worker still busy at exit, leaving cleanup to the OS");
            }
        }
    }

    fn notice(&mut self, message: &str) {
        self.dialog = Some(Dialog::Notice(message.to_string()));
    }
}
