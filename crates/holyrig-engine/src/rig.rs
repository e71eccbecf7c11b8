//! The per-rig runtime task.
//!
//! One task owns everything about one radio: the transport, the compiled
//! model, the current status vector, and the command queue. The task runs a
//! small state machine:
//!
//! ```text
//! NotConnected --open--> Initializing --init ok--> Online
//!       |                     |  \
//!       |                     |   init failed x R
//!       v                     v
//!  NotResponding <--- repeated timeouts / channel loss
//!       |  periodic reconnect
//!       v
//!  Initializing ...            Disabled (terminal, by request)
//! ```
//!
//! While Online, client commands run FIFO and take priority; status polls
//! advance round-robin between them, never overlapping an exchange. Status
//! changes are diffed against the previous vector and emitted as
//! [`StatusEvent`]s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use holyrig_core::{
    Connector, Error, LinkEvent, Result, RigSettings, RigState, StatusEvent, Transport, Value,
};
use holyrig_schema::Model;

use crate::exchange::exchange;

/// Timing and retry knobs for one rig runtime.
#[derive(Debug, Clone)]
pub struct RigTuning {
    /// Per-exchange reply deadline.
    pub exchange_timeout: Duration,
    /// Delay between successive status poll exchanges.
    pub poll_interval: Duration,
    /// Total attempts for each init frame before giving up.
    pub init_attempts: u32,
    /// Base backoff between init attempts; doubles per retry, with jitter.
    pub init_backoff: Duration,
    /// Delay between reconnection attempts while NotResponding.
    pub reconnect_period: Duration,
    /// Consecutive reply timeouts tolerated while Online.
    pub max_consecutive_timeouts: u32,
}

impl Default for RigTuning {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(500),
            init_attempts: 3,
            init_backoff: Duration::from_millis(100),
            reconnect_period: Duration::from_secs(5),
            max_consecutive_timeouts: 3,
        }
    }
}

impl RigTuning {
    /// Derive tuning from a rig's configured settings.
    pub fn from_settings(settings: &RigSettings) -> Self {
        Self {
            exchange_timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            ..Self::default()
        }
    }
}

/// A queued client command.
struct CommandRequest {
    command: String,
    params: BTreeMap<String, Value>,
    done: oneshot::Sender<Result<()>>,
}

/// Administrative requests, separate from the command FIFO.
enum RigControl {
    Disable,
}

/// Handle for submitting work to a rig task.
#[derive(Clone)]
pub struct RigHandle {
    id: String,
    model: Arc<Model>,
    cmd_tx: mpsc::Sender<CommandRequest>,
    control_tx: mpsc::Sender<RigControl>,
    state_rx: watch::Receiver<RigState>,
}

impl RigHandle {
    /// The rig's configured id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The compiled model this rig runs.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The rig's current lifecycle state.
    pub fn state(&self) -> RigState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RigState> {
        self.state_rx.clone()
    }

    /// Enqueue a command and wait for its exchange to complete.
    ///
    /// Commands complete in submission order. Dropping the returned future
    /// before the exchange starts cancels the command.
    pub async fn execute(
        &self,
        command: impl Into<String>,
        params: BTreeMap<String, Value>,
    ) -> Result<()> {
        if self.state() == RigState::Disabled {
            return Err(Error::RigDisabled);
        }
        let (done, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest {
                command: command.into(),
                params,
                done,
            })
            .await
            .map_err(|_| {
                if self.state() == RigState::Disabled {
                    Error::RigDisabled
                } else {
                    Error::ConnectionLost
                }
            })?;
        done_rx.await.map_err(|_| {
            if self.state() == RigState::Disabled {
                Error::RigDisabled
            } else {
                Error::ConnectionLost
            }
        })?
    }

    /// Administratively disable the rig. In-flight I/O completes; further
    /// submissions are rejected with [`Error::RigDisabled`].
    pub async fn disable(&self) {
        let _ = self.control_tx.send(RigControl::Disable).await;
    }
}

/// Spawn the runtime task for one rig and return its handle.
pub fn spawn(
    id: String,
    model: Arc<Model>,
    connector: Box<dyn Connector>,
    tuning: RigTuning,
    status_tx: mpsc::Sender<StatusEvent>,
    link_tx: mpsc::Sender<LinkEvent>,
) -> RigHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (control_tx, control_rx) = mpsc::channel(4);
    let (state_tx, state_rx) = watch::channel(RigState::NotConnected);

    let task = RigTask {
        id: id.clone(),
        model: Arc::clone(&model),
        connector,
        tuning,
        cmd_rx,
        control_rx,
        state_tx,
        status_tx,
        link_tx,
        status_vector: BTreeMap::new(),
        poll_cursor: 0,
        consecutive_timeouts: 0,
    };
    tokio::spawn(task.run());

    RigHandle {
        id,
        model,
        cmd_tx,
        control_tx,
        state_rx,
    }
}

struct RigTask {
    id: String,
    model: Arc<Model>,
    connector: Box<dyn Connector>,
    tuning: RigTuning,
    cmd_rx: mpsc::Receiver<CommandRequest>,
    control_rx: mpsc::Receiver<RigControl>,
    state_tx: watch::Sender<RigState>,
    status_tx: mpsc::Sender<StatusEvent>,
    link_tx: mpsc::Sender<LinkEvent>,
    status_vector: BTreeMap<String, Value>,
    poll_cursor: usize,
    consecutive_timeouts: u32,
}

impl RigTask {
    async fn run(mut self) {
        let mut transport: Option<Box<dyn Transport>> = None;
        let mut state = RigState::NotConnected;

        loop {
            self.publish_state(state).await;

            let next = match state {
                RigState::NotConnected => match self.connector.connect().await {
                    Ok(channel) => {
                        transport = Some(channel);
                        Some(RigState::Initializing)
                    }
                    Err(err) => {
                        warn!(rig = %self.id, error = %err, "failed to open channel");
                        Some(RigState::NotResponding)
                    }
                },

                RigState::Initializing => {
                    let outcome = match transport.as_mut() {
                        Some(channel) => self.run_init(channel).await,
                        None => Err(Error::NotConnected),
                    };
                    match outcome {
                        Ok(()) => {
                            self.consecutive_timeouts = 0;
                            Some(RigState::Online)
                        }
                        Err(err) => {
                            warn!(rig = %self.id, error = %err, "init failed");
                            close_transport(&mut transport).await;
                            Some(RigState::NotResponding)
                        }
                    }
                }

                RigState::Online => {
                    let next = self.online(&mut transport).await;
                    if next != Some(RigState::Online) {
                        close_transport(&mut transport).await;
                    }
                    next
                }

                RigState::NotResponding => {
                    close_transport(&mut transport).await;
                    self.not_responding(&mut transport).await
                }

                RigState::Disabled => {
                    close_transport(&mut transport).await;
                    self.drain_disabled().await;
                    return;
                }
            };

            match next {
                Some(next) => state = next,
                None => {
                    debug!(rig = %self.id, "all handles dropped, stopping");
                    return;
                }
            }
        }
    }

    /// Publish a state transition to the watch channel and the link event
    /// stream.
    async fn publish_state(&mut self, state: RigState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        info!(rig = %self.id, %state, "state change");
        self.state_tx.send_replace(state);
        let _ = self
            .link_tx
            .send(LinkEvent {
                rig_id: self.id.clone(),
                state,
            })
            .await;
    }

    /// Send each init frame in order, retrying with backoff.
    async fn run_init(&mut self, transport: &mut Box<dyn Transport>) -> Result<()> {
        let init = self.model.init.clone();
        for (index, template) in init.iter().enumerate() {
            let frame = template.pattern.to_bytes();
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let outcome =
                    exchange(transport, &frame, template.reply.as_ref(), self.tuning.exchange_timeout)
                        .await
                        .and_then(|reply| match (&template.reply, reply) {
                            (Some(spec), Some(bytes)) => spec.check(&bytes),
                            _ => Ok(()),
                        });

                match outcome {
                    Ok(()) => {
                        debug!(rig = %self.id, index, "init frame acknowledged");
                        break;
                    }
                    Err(err) if attempt < self.tuning.init_attempts => {
                        warn!(rig = %self.id, index, attempt, error = %err, "init frame failed, retrying");
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Exponential backoff with jitter for init retries.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.tuning.init_backoff * 2u32.saturating_pow(attempt - 1);
        let jitter_ms = base.as_millis() as u64 / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        base + jitter
    }

    /// The Online dispatch loop. Commands first, polls between them.
    async fn online(&mut self, transport: &mut Option<Box<dyn Transport>>) -> Option<RigState> {
        let Some(channel) = transport.as_mut() else {
            return Some(RigState::NotConnected);
        };
        let mut next_poll = tokio::time::Instant::now() + self.tuning.poll_interval;

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(RigControl::Disable) => return Some(RigState::Disabled),
                    None => return None,
                },

                request = self.cmd_rx.recv() => match request {
                    Some(request) => {
                        if let Some(next) = self.run_command(channel, request).await {
                            return Some(next);
                        }
                    }
                    None => return None,
                },

                _ = tokio::time::sleep_until(next_poll) => {
                    if let Some(next) = self.run_poll(channel).await {
                        return Some(next);
                    }
                    next_poll = tokio::time::Instant::now() + self.tuning.poll_interval;
                }
            }
        }
    }

    /// Execute one queued command. Returns the next state when the failure
    /// calls for leaving Online.
    async fn run_command(
        &mut self,
        transport: &mut Box<dyn Transport>,
        request: CommandRequest,
    ) -> Option<RigState> {
        // The submitter is gone and I/O has not started: cancel silently.
        if request.done.is_closed() {
            debug!(rig = %self.id, command = %request.command, "command cancelled before I/O");
            return None;
        }

        let result = self
            .exchange_command(transport, &request.command, &request.params)
            .await;

        let next = match &result {
            Ok(()) => {
                self.consecutive_timeouts = 0;
                None
            }
            Err(Error::Timeout) => {
                self.consecutive_timeouts += 1;
                warn!(
                    rig = %self.id,
                    command = %request.command,
                    consecutive = self.consecutive_timeouts,
                    "command timed out"
                );
                (self.consecutive_timeouts >= self.tuning.max_consecutive_timeouts)
                    .then_some(RigState::NotResponding)
            }
            Err(Error::ConnectionLost | Error::Io(_) | Error::NotConnected) => {
                Some(RigState::NotResponding)
            }
            // Encode and reply-validation failures surface to the client
            // but do not count against the link.
            Err(_) => None,
        };

        let _ = request.done.send(result);
        next
    }

    async fn exchange_command(
        &mut self,
        transport: &mut Box<dyn Transport>,
        command: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let template = self
            .model
            .commands
            .get(command)
            .ok_or_else(|| Error::UnsupportedCommand(command.to_string()))?;
        let frame = holyrig_codec::encode(template, params, &self.model.enums, self.model.transform)?;

        let reply = exchange(
            transport,
            &frame,
            template.reply.as_ref(),
            self.tuning.exchange_timeout,
        )
        .await?;

        if let (Some(spec), Some(bytes)) = (&template.reply, reply) {
            spec.check(&bytes)?;
        }
        Ok(())
    }

    /// Run the next status poll in round-robin order.
    async fn run_poll(&mut self, transport: &mut Box<dyn Transport>) -> Option<RigState> {
        if self.model.status.is_empty() {
            return None;
        }
        let name = self
            .model
            .status
            .keys()
            .nth(self.poll_cursor % self.model.status.len())
            .cloned()?;
        self.poll_cursor = self.poll_cursor.wrapping_add(1);
        let template = &self.model.status[&name];
        let frame = template.pattern.to_bytes();

        match exchange(transport, &frame, template.reply.as_ref(), self.tuning.exchange_timeout).await
        {
            Ok(Some(reply)) => {
                self.consecutive_timeouts = 0;
                match holyrig_codec::decode(template, &reply, &self.model.enums, self.model.transform)
                {
                    Ok(values) => self.apply_status(values).await,
                    Err(err) => {
                        warn!(rig = %self.id, poll = %name, error = %err, "status reply rejected");
                    }
                }
                None
            }
            Ok(None) => {
                self.consecutive_timeouts = 0;
                None
            }
            Err(Error::Timeout) => {
                self.consecutive_timeouts += 1;
                warn!(
                    rig = %self.id,
                    poll = %name,
                    consecutive = self.consecutive_timeouts,
                    "status poll timed out"
                );
                (self.consecutive_timeouts >= self.tuning.max_consecutive_timeouts)
                    .then_some(RigState::NotResponding)
            }
            Err(Error::ConnectionLost | Error::Io(_) | Error::NotConnected) => {
                Some(RigState::NotResponding)
            }
            Err(err) => {
                warn!(rig = %self.id, poll = %name, error = %err, "status poll failed");
                None
            }
        }
    }

    /// Merge freshly polled values into the status vector and emit the
    /// changed subset.
    async fn apply_status(&mut self, values: BTreeMap<String, Value>) {
        let mut changed = BTreeMap::new();
        for (field, value) in values {
            if self.status_vector.get(&field) != Some(&value) {
                self.status_vector.insert(field.clone(), value.clone());
                changed.insert(field, value);
            }
        }
        if changed.is_empty() {
            return;
        }
        debug!(rig = %self.id, fields = ?changed.keys().collect::<Vec<_>>(), "status changed");
        let _ = self
            .status_tx
            .send(StatusEvent {
                rig_id: self.id.clone(),
                values: changed,
            })
            .await;
    }

    /// Reconnection cycle: reject commands, retry the connector.
    async fn not_responding(
        &mut self,
        transport: &mut Option<Box<dyn Transport>>,
    ) -> Option<RigState> {
        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(RigControl::Disable) => return Some(RigState::Disabled),
                    None => return None,
                },

                request = self.cmd_rx.recv() => match request {
                    Some(request) => {
                        let _ = request.done.send(Err(Error::NotConnected));
                    }
                    None => return None,
                },

                _ = tokio::time::sleep(self.tuning.reconnect_period) => {
                    match self.connector.connect().await {
                        Ok(channel) => {
                            info!(rig = %self.id, "channel reopened");
                            *transport = Some(channel);
                            self.consecutive_timeouts = 0;
                            return Some(RigState::Initializing);
                        }
                        Err(err) => {
                            debug!(rig = %self.id, error = %err, "reconnect attempt failed");
                        }
                    }
                }
            }
        }
    }

    /// Terminal state: reject everything until the handles go away.
    async fn drain_disabled(&mut self) {
        self.cmd_rx.close();
        while let Some(request) = self.cmd_rx.recv().await {
            let _ = request.done.send(Err(Error::RigDisabled));
        }
    }
}

async fn close_transport(transport: &mut Option<Box<dyn Transport>>) {
    if let Some(mut channel) = transport.take() {
        let _ = channel.close().await;
    }
}
