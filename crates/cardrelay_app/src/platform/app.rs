use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use cardrelay_core::{is_restricted_url, MessageId, MessageStatus, PanelEvent, PanelState, ReceiverId};
use cardrelay_engine::{
    ensure_state_dir, CardRequest, DeliveryError, EngineEvent, EngineHandle, ReqwestGenerationClient,
    RequestId,
};
use relay_logging::{clip, relay_debug, relay_info, relay_warn};

use super::config::{ConfigFile, CONFIG_FILENAME};
use super::input::{self, Input, HELP};
use super::logging;
use super::presenter::TerminalPresenter;
use super::save;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for in-flight cards once stdin is closed.
const DRAIN_GRACE: Duration = Duration::from_secs(15);

pub fn run_app() -> anyhow::Result<()> {
    let working_dir = std::env::current_dir().context("resolving working directory")?;
    let config_path = working_dir.join(CONFIG_FILENAME);
    let (file, config_error) = match ConfigFile::read(&config_path) {
        Ok(file) => (file, None),
        Err(err) => (ConfigFile::default(), Some(err)),
    };

    logging::initialize(file.log_destination(), file.log_level());
    if let Some(err) = config_error {
        relay_warn!("ignoring configuration: {:#}", err);
    }

    let config = file.engine_config(&working_dir);
    ensure_state_dir(&config.state_dir)
        .with_context(|| format!("preparing state directory {}", config.state_dir.display()))?;
    let service = ReqwestGenerationClient::new(config.service.clone())
        .context("building generation client")?;
    relay_info!(
        "cardrelay starting; service at {}, state in {:?}",
        config.service.base_url,
        config.state_dir
    );

    let mut app = App::new(EngineHandle::new(config, Arc::new(service)));
    let lines = spawn_stdin_reader();
    println!("{HELP}");

    loop {
        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => match input::parse(&line) {
                Ok(Input::Quit) => break,
                Ok(input) => app.handle_input(input),
                Err(message) if message.is_empty() => {}
                Err(message) => println!("{message}"),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                app.drain_until_idle(DRAIN_GRACE);
                break;
            }
        }
        app.pump();
    }

    relay_info!("cardrelay shutting down");
    Ok(())
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Host state: the tabs we know about and the panel of the last trigger.
struct App {
    engine: EngineHandle,
    panel: PanelState,
    tabs: HashMap<ReceiverId, String>,
    pending: HashMap<RequestId, ReceiverId>,
    current_message: Option<MessageId>,
}

impl App {
    fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            panel: PanelState::new(),
            tabs: HashMap::new(),
            pending: HashMap::new(),
            current_message: None,
        }
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Open { tab, url } => {
                if is_restricted_url(&url) {
                    println!("[tab {tab}] browser page, cards cannot be shown here");
                }
                self.engine
                    .open_tab(tab, url.clone(), Arc::new(TerminalPresenter::new(tab)), true);
                self.tabs.insert(tab, url);
            }
            Input::Visibility { tab, visible } => self.engine.set_visibility(tab, visible),
            Input::Close { tab } => {
                self.tabs.remove(&tab);
                self.engine.close_tab(tab);
            }
            Input::Card { tab, text } => {
                if text.trim().is_empty() {
                    self.panel.apply(PanelEvent::EmptySelection);
                    return;
                }
                let url = self.tabs.get(&tab).cloned().unwrap_or_default();
                self.panel.apply(PanelEvent::Requested);
                let request_id = self.engine.generate_card(tab, CardRequest::new(text, url));
                self.pending.insert(request_id, tab);
                self.panel.apply(PanelEvent::Generating);
            }
            Input::Last => self.engine.take_last_result(),
            Input::Save { path } => match save::save_card(&self.panel.view(), &path) {
                Ok(saved) => println!("[panel] card saved to {}", saved.display()),
                Err(err) => println!("[panel] cannot save: {err:#}"),
            },
            Input::Help => println!("{HELP}"),
            Input::Quit => {}
        }
    }

    /// Applies every queued engine event and prints the panel if it changed.
    fn pump(&mut self) {
        while let Some(event) = self.engine.try_recv() {
            self.handle_event(event);
        }
        if self.panel.consume_dirty() {
            println!("[panel] {}", self.panel.view().status_line);
        }
    }

    fn drain_until_idle(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.pending.is_empty() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
            self.pump();
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CardAccepted {
                request_id,
                message_id,
                image_ref,
                ..
            } => {
                if self.pending.remove(&request_id).is_some() {
                    self.current_message = Some(message_id);
                    self.panel.apply(PanelEvent::Delivered { image_ref });
                }
            }
            EngineEvent::CardFailed { request_id, error } => {
                if self.pending.remove(&request_id).is_some() {
                    self.panel.apply(PanelEvent::Failed {
                        reason: failure_reason(&error),
                    });
                }
            }
            EngineEvent::Status(change) => {
                relay_debug!(
                    "message {} on tab {}: {} -> {}",
                    change.message_id,
                    change.receiver,
                    change.from,
                    change.to
                );
                if self.current_message != Some(change.message_id) {
                    return;
                }
                match change.to {
                    MessageStatus::Completed => self.panel.apply(PanelEvent::Shown),
                    MessageStatus::Failed => {
                        if let Some(error) = change.delivery_error() {
                            self.panel.apply(PanelEvent::Failed {
                                reason: failure_reason(&error),
                            });
                        }
                    }
                    _ => {}
                }
            }
            EngineEvent::LastResult(Some(result)) => {
                println!("last card (from {}): {}", result.url, clip(&result.image_ref, 72));
            }
            EngineEvent::LastResult(None) => println!("no card waiting"),
            EngineEvent::ReceiverFailed { receiver, error } => {
                relay_warn!("tab {} is unusable: {}", receiver, error);
                println!("[tab {receiver}] {error}");
            }
        }
    }
}

/// Text shown after "Generation failed: ".
fn failure_reason(error: &DeliveryError) -> String {
    match error {
        DeliveryError::UpstreamFailed(err) => err.message.clone(),
        other => other.to_string(),
    }
}
