//! Session controller: the single owner of the timeline.
//!
//! Three event sources feed it (user input, transport callbacks and store
//! snapshots), all funnelled through one channel and applied one at a time.
//! The streaming reducer and the remote subscriber only hand back
//! proposals or snapshots; the controller applies them and republishes a
//! merged `TimelineView` after every event.

use crate::command::{ Command, Input };
use crate::config::SessionConfig;
use crate::error::{ CommandError, StoreError };
use crate::models::chat::{ now_millis, Message, MessageId };
use crate::models::presence::TypingSignal;
use crate::models::websocket::OutboundFrame;
use crate::order;
use crate::presence::{ announce_presence, TypingHeartbeat };
use crate::reducer::{ StreamingReducer, TimelineProposal };
use crate::store::RemoteStore;
use crate::subscriber::{ RemoteEvent, RemotePartition, RemoteTimelineSubscriber };
use crate::transport::{ ConnectionState, Transport, TransportEvent };
use log::{ debug, info };
use std::collections::{ HashMap, HashSet };
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ mpsc, watch };
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WaitingState {
    GeneratingCode,
    RunningCode,
    UploadingFile,
    #[default]
    Idle,
}

impl WaitingState {
    fn expects_output(self) -> bool {
        matches!(self, WaitingState::GeneratingCode | WaitingState::RunningCode)
    }
}

impl fmt::Display for WaitingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WaitingState::GeneratingCode => "Generating code",
            WaitingState::RunningCode => "Running code",
            WaitingState::UploadingFile => "Uploading file",
            WaitingState::Idle => "Idle",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Submit(String),
    Retry(String),
    SetPinned {
        id: MessageId,
        value: bool,
    },
    TogglePin(MessageId),
    UploadStarted(String),
    UploadCompleted(String),
    TypingStarted,
    TypingStopped,
    Transport(TransportEvent),
    Remote(RemoteEvent),
    Shutdown,
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        SessionEvent::Transport(event)
    }
}

impl From<RemoteEvent> for SessionEvent {
    fn from(event: RemoteEvent) -> Self {
        SessionEvent::Remote(event)
    }
}

/// Render-ready state published after every event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineView {
    /// Merged timeline in timestamp order.
    pub messages: Vec<Message>,
    pub waiting: WaitingState,
    pub connection: ConnectionState,
    /// Fresh typing signals from other participants.
    pub typing: Vec<TypingSignal>,
    pub revision: u64,
}

impl Default for TimelineView {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            waiting: WaitingState::Idle,
            connection: ConnectionState::Connecting,
            typing: Vec::new(),
            revision: 0,
        }
    }
}

impl TimelineView {
    pub fn display_order(&self) -> Vec<&Message> {
        order::display_order(&self.messages)
    }

    pub fn pinned_ids(&self) -> HashSet<&str> {
        order::pin_set(&self.messages)
    }

    pub fn typing_banner(&self) -> Option<String> {
        if self.typing.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.typing
            .iter()
            .map(|signal| signal.label())
            .collect();
        Some(format!("{} typing...", names.join(", ")))
    }
}

pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn RemoteStore>,
    subscriber: RemoteTimelineSubscriber,
    reducer: StreamingReducer,
    local: Vec<Message>,
    /// Local messages grown since their last persisted copy arrived.
    unsynced: HashSet<MessageId>,
    remote: RemotePartition,
    cleared_at: Option<i64>,
    waiting: WaitingState,
    connection: ConnectionState,
    last_timestamp: i64,
    heartbeat: Option<TypingHeartbeat>,
    stopping_heartbeat: Option<JoinHandle<()>>,
    view_tx: watch::Sender<TimelineView>,
    revision: u64,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn RemoteStore>
    ) -> Self {
        let subscriber = RemoteTimelineSubscriber::new(Arc::clone(&store), &config.session_id);
        let reducer = StreamingReducer::new(config.seal_on_final);
        let connection = transport.state();
        let (view_tx, _) = watch::channel(TimelineView::default());

        let mut controller = Self {
            config,
            transport,
            store,
            subscriber,
            reducer,
            local: Vec::new(),
            unsynced: HashSet::new(),
            remote: RemotePartition::default(),
            cleared_at: None,
            waiting: WaitingState::Idle,
            connection,
            last_timestamp: 0,
            heartbeat: None,
            stopping_heartbeat: None,
            view_tx,
            revision: 0,
        };

        for line in controller.config.greeting.clone() {
            let ts = controller.next_timestamp();
            controller.local.push(Message::notice(line, ts));
        }
        controller.publish();
        controller
    }

    /// Starts the store subscriptions and announces presence.
    pub async fn attach(
        &mut self,
        events: mpsc::UnboundedSender<SessionEvent>
    ) -> Result<(), StoreError> {
        self.subscriber.start(events).await?;
        announce_presence(
            self.store.as_ref(),
            &self.config.subject_id,
            self.config.display_name.as_deref(),
            true
        ).await;
        Ok(())
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TimelineView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> TimelineView {
        self.view_tx.borrow().clone()
    }

    pub fn waiting(&self) -> WaitingState {
        self.waiting
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Processes events until `Shutdown` or until every sender is gone.
    /// Typing signals that go stale in a quiet session are dropped on a timer.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let mut typing_expiry = tokio::time::interval(self.typing_check_period());
        typing_expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(SessionEvent::Shutdown) | None => break,
                        Some(event) => self.dispatch(event),
                    }
                }
                _ = typing_expiry.tick() => self.expire_typing(),
            }
        }
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down session {}", self.config.session_id);
        self.subscriber.cancel();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop(true).await;
        }
        if let Some(stopping) = self.stopping_heartbeat.take() {
            let _ = stopping.await;
        }
        self.transport.close();
        announce_presence(
            self.store.as_ref(),
            &self.config.subject_id,
            self.config.display_name.as_deref(),
            false
        ).await;
    }

    pub fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Submit(text) => self.submit(&text),
            SessionEvent::Retry(text) => self.retry(&text),
            SessionEvent::SetPinned { id, value } => self.set_pinned(&id, value),
            SessionEvent::TogglePin(id) => self.toggle_pin(&id),
            SessionEvent::UploadStarted(filename) => self.on_upload_started(&filename),
            SessionEvent::UploadCompleted(filename) => self.on_upload_completed(&filename),
            SessionEvent::TypingStarted => self.typing_started(),
            SessionEvent::TypingStopped => self.typing_stopped(),
            SessionEvent::Transport(TransportEvent::Frame(frame)) => {
                let ts = self.next_timestamp();
                let proposals = self.reducer.reduce(self.local.last(), frame.into(), ts);
                for proposal in proposals {
                    self.apply(proposal);
                }
            }
            SessionEvent::Transport(TransportEvent::StateChanged(state)) => {
                self.on_state_change(state);
            }
            SessionEvent::Remote(RemoteEvent::Messages(records)) => {
                debug!("Applying snapshot of {} message(s)", records.len());
                self.remote.replace(records);
                self.settle_unsynced();
            }
            SessionEvent::Remote(RemoteEvent::Typing(signals)) => {
                self.remote.replace_typing(signals);
            }
            SessionEvent::Shutdown => {}
        }
        self.publish();
    }

    fn submit(&mut self, text: &str) {
        let text = text.trim();
        let input = match
            self.config.commands.classify(text, &self.config.model, &self.config.credential)
        {
            Ok(input) => input,
            Err(CommandError::Empty) => {
                debug!("Ignoring empty input");
                return;
            }
        };

        match input {
            Input::Command(Command::Reset) => {
                let ts = self.next_timestamp();
                self.push_local(Message::notice("Restarting kernel...", ts));
                self.transport.send(OutboundFrame::Reset);
            }
            Input::Command(Command::Clear) => self.clear(),
            Input::Payload(frame) => {
                self.typing_stopped();
                let ts = self.next_timestamp();
                self.push_local(Message::user(text, ts));
                self.waiting = WaitingState::GeneratingCode;
                self.transport.send(frame);
            }
        }
    }

    /// Re-sends `text` as a fresh run. The failed attempt is left untouched.
    fn retry(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let ts = self.next_timestamp();
        self.push_local(Message::notice(format!("Retrying: {}", text), ts));
        self.waiting = WaitingState::GeneratingCode;
        self.transport.send(OutboundFrame::RunCode {
            code: text.to_string(),
            model: self.config.model.clone(),
            credential: self.config.credential.clone(),
        });
    }

    /// Hides everything currently shown, including persisted messages up to now.
    fn clear(&mut self) {
        self.local.clear();
        self.unsynced.clear();
        let cleared_at = self.next_timestamp();
        self.cleared_at = Some(cleared_at);
        // anything created from now on must sort strictly after the watermark
        self.last_timestamp = cleared_at + 1;
        self.reducer.reset();
        info!("Cleared timeline for session {}", self.config.session_id);
    }

    fn set_pinned(&mut self, id: &str, value: bool) {
        if self.remote.hint_pinned(id, value) {
            self.subscriber.write_pinned(id, value);
            return;
        }
        match self.local.iter_mut().find(|msg| msg.id == id) {
            Some(msg) => {
                msg.pinned = value;
                if self.config.persist_local {
                    self.subscriber.write_pinned(id, value);
                }
            }
            None => debug!("Pin toggle for unknown message {}", id),
        }
    }

    fn toggle_pin(&mut self, id: &str) {
        let current = self.remote
            .pinned(id)
            .or_else(|| {
                self.local
                    .iter()
                    .find(|msg| msg.id == id)
                    .map(|msg| msg.pinned)
            });
        match current {
            Some(pinned) => self.set_pinned(id, !pinned),
            None => debug!("Pin toggle for unknown message {}", id),
        }
    }

    fn on_upload_started(&mut self, filename: &str) {
        debug!("Upload of {} started", filename);
        self.waiting = WaitingState::UploadingFile;
    }

    fn on_upload_completed(&mut self, filename: &str) {
        let ts = self.next_timestamp();
        self.push_local(Message::notice(format!("File {} uploaded successfully.", filename), ts));
        self.waiting = WaitingState::Idle;
    }

    fn typing_started(&mut self) {
        if self.heartbeat.as_ref().is_some_and(|heartbeat| heartbeat.is_running()) {
            return;
        }
        self.heartbeat = Some(
            TypingHeartbeat::start_after(
                self.stopping_heartbeat.take(),
                Arc::clone(&self.store),
                &self.config.session_id,
                &self.config.subject_id,
                self.config.display_name.clone(),
                self.config.heartbeat_interval
            )
        );
    }

    fn typing_stopped(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            self.stopping_heartbeat = Some(tokio::spawn(heartbeat.stop(true)));
        }
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        info!("Transport state: {} -> {}", self.connection, state);
        self.connection = state;
        if state.is_down() && self.waiting.expects_output() {
            info!("Transport {} while {}, no further output expected", state, self.waiting);
            self.waiting = WaitingState::Idle;
        }
    }

    fn apply(&mut self, proposal: TimelineProposal) {
        match proposal {
            TimelineProposal::Append { id, text } => {
                match self.local.iter_mut().find(|msg| msg.id == id) {
                    Some(msg) => {
                        msg.text.push_str(&text);
                        self.unsynced.insert(id);
                    }
                    None => debug!("Dropping chunk for vanished message {}", id),
                }
            }
            TimelineProposal::Insert(msg) => self.local.push(msg),
            TimelineProposal::Completed { id } => {
                if !self.config.persist_local {
                    return;
                }
                let Some(msg) = id.and_then(|id| self.local.iter().find(|msg| msg.id == id)) else {
                    return;
                };
                let mut record = msg.to_record();
                if let Some(pinned) = self.remote.pinned(&record.id) {
                    record.pinned = pinned;
                }
                self.subscriber.persist(record);
            }
            TimelineProposal::Waiting(WaitingState::RunningCode) => {
                if !self.connection.is_down() {
                    self.waiting = WaitingState::RunningCode;
                }
            }
            TimelineProposal::Waiting(state) => self.waiting = state,
        }
    }

    fn push_local(&mut self, msg: Message) {
        if self.config.persist_local {
            self.subscriber.persist(msg.to_record());
        }
        self.local.push(msg);
    }

    fn next_timestamp(&mut self) -> i64 {
        self.last_timestamp = now_millis().max(self.last_timestamp);
        self.last_timestamp
    }

    /// Forgets local edits once a snapshot carries the same text.
    fn settle_unsynced(&mut self) {
        let local = &self.local;
        let remote = &self.remote;
        self.unsynced.retain(|id| {
            match local.iter().find(|msg| &msg.id == id) {
                Some(msg) => remote.text(id) != Some(msg.text.as_str()),
                None => false,
            }
        });
    }

    /// Persisted messages win over local copies with the same id, except for
    /// text appended locally that no snapshot has carried yet. Local
    /// messages never persisted stay visible with `Origin::Local`.
    pub fn timeline(&self) -> Vec<Message> {
        let persisted: Vec<Message> = self.remote
            .messages()
            .into_iter()
            .filter(|msg| self.cleared_at.map_or(true, |cleared| msg.timestamp > cleared))
            .collect();
        let mut unmatched: HashMap<&str, &Message> = persisted
            .iter()
            .map(|msg| (msg.id.as_str(), msg))
            .collect();

        let mut merged: Vec<Message> = self.local
            .iter()
            .map(|msg| {
                match unmatched.remove(msg.id.as_str()) {
                    Some(stored) if self.unsynced.contains(&msg.id) => {
                        let mut shown = stored.clone();
                        shown.text = msg.text.clone();
                        shown
                    }
                    Some(stored) => stored.clone(),
                    None => msg.clone(),
                }
            })
            .collect();
        merged.extend(
            persisted
                .iter()
                .filter(|msg| unmatched.contains_key(msg.id.as_str()))
                .cloned()
        );
        merged.sort_by_key(|msg| msg.timestamp);
        merged
    }

    fn fresh_typing(&self) -> Vec<TypingSignal> {
        let now = now_millis();
        let stale_after = self.config.typing_stale_after.as_millis() as i64;
        self.remote
            .typing()
            .iter()
            .filter(|signal| signal.subject_id != self.config.subject_id)
            .filter(|signal| !signal.is_stale(now, stale_after))
            .cloned()
            .collect()
    }

    fn typing_check_period(&self) -> Duration {
        (self.config.typing_stale_after / 4).max(Duration::from_millis(50))
    }

    fn expire_typing(&mut self) {
        let changed = self.view_tx.borrow().typing != self.fresh_typing();
        if changed {
            self.publish();
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let view = TimelineView {
            messages: self.timeline(),
            waiting: self.waiting,
            connection: self.connection,
            typing: self.fresh_typing(),
            revision: self.revision,
        };
        self.view_tx.send_replace(view);
    }
}
