//! Tokio driver for an [`RldpConnection`].
//!
//! The connection itself performs no I/O. [`spawn_connection`] moves it into
//! a task that owns the clock: incoming datagrams and caller requests arrive
//! over a command channel, outgoing datagrams leave through `datagram_tx`,
//! and the task sleeps until the next wake-up time the connection reports.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;
use tracing::{debug, trace};

use crate::config::RldpConfig;
use crate::connection::{RldpConnection, RldpEvent};
use crate::error::{RldpError, Result};
use crate::types::TransferId;

enum Command {
    Send {
        transfer_id: TransferId,
        data: Vec<u8>,
        deadline: Option<Instant>,
        done: oneshot::Sender<Result<()>>,
    },
    Receive {
        transfer_id: TransferId,
        deadline: Option<Instant>,
        max_size: u64,
        done: oneshot::Sender<Result<Vec<u8>>>,
    },
    Datagram(Vec<u8>),
}

/// Cloneable handle to a running connection task.
///
/// The task stops once every handle is dropped.
#[derive(Clone)]
pub struct RldpHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RldpHandle {
    /// Sends `data` and waits until the peer has received all of it.
    ///
    /// A zero `transfer_id` is replaced by a random one.
    pub async fn send(
        &self,
        transfer_id: TransferId,
        data: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                transfer_id,
                data,
                deadline,
                done,
            })
            .map_err(|_| RldpError::ChannelClosed)?;
        rx.await?
    }

    /// Waits for the inbound transfer `transfer_id`, accepting at most
    /// `max_size` bytes.
    pub async fn receive(
        &self,
        transfer_id: TransferId,
        deadline: Option<Instant>,
        max_size: u64,
    ) -> Result<Vec<u8>> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Receive {
                transfer_id,
                deadline,
                max_size,
                done,
            })
            .map_err(|_| RldpError::ChannelClosed)?;
        rx.await?
    }

    /// Hands a datagram received from the peer to the connection.
    pub fn deliver(&self, datagram: Vec<u8>) -> Result<()> {
        self.commands
            .send(Command::Datagram(datagram))
            .map_err(|_| RldpError::ChannelClosed)
    }
}

/// Spawns a connection task.
///
/// Returns a handle and a channel of inbound transfers nobody called
/// [`RldpHandle::receive`] for.
pub fn spawn_connection(
    config: RldpConfig,
    datagram_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> (RldpHandle, mpsc::UnboundedReceiver<(TransferId, Vec<u8>)>) {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();

    let task = ConnectionTask {
        connection: RldpConnection::new(config),
        datagram_tx,
        unsolicited_tx,
        senders: HashMap::new(),
        receivers: HashMap::new(),
    };
    tokio::spawn(task.run(command_rx));

    (RldpHandle { commands }, unsolicited_rx)
}

struct ConnectionTask {
    connection: RldpConnection,
    datagram_tx: mpsc::UnboundedSender<Vec<u8>>,
    unsolicited_tx: mpsc::UnboundedSender<(TransferId, Vec<u8>)>,
    senders: HashMap<TransferId, Vec<oneshot::Sender<Result<()>>>>,
    receivers: HashMap<TransferId, oneshot::Sender<Result<Vec<u8>>>>,
}

impl ConnectionTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let wakeup_at = self.connection.run(now());
            if !self.flush() {
                debug!("Datagram channel closed, stopping RLDP2 connection");
                return;
            }

            let command = match wakeup_at {
                Some(at) => tokio::select! {
                    command = command_rx.recv() => command,
                    _ = sleep_until(at.into()) => continue,
                },
                None => command_rx.recv().await,
            };
            let Some(command) = command else {
                debug!("All RLDP2 handles dropped, stopping connection");
                return;
            };
            self.on_command(command);
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send {
                transfer_id,
                data,
                deadline,
                done,
            } => {
                // A repeated id joins the transfer already in progress.
                let transfer_id = self.connection.send(transfer_id, data, deadline);
                self.senders.entry(transfer_id).or_default().push(done);
            }
            Command::Receive {
                transfer_id,
                deadline,
                max_size,
                done,
            } => {
                self.connection
                    .set_receive_limits(transfer_id, deadline, max_size);
                self.receivers.insert(transfer_id, done);
            }
            Command::Datagram(datagram) => {
                self.connection.on_datagram(&datagram, now());
            }
        }
    }

    /// Pushes out pending datagrams and dispatches events. Returns false
    /// once the datagram channel is gone.
    fn flush(&mut self) -> bool {
        while let Some(datagram) = self.connection.poll_transmit() {
            if self.datagram_tx.send(datagram).is_err() {
                return false;
            }
        }

        while let Some(event) = self.connection.poll_event() {
            match event {
                RldpEvent::Sent {
                    transfer_id,
                    result,
                } => {
                    for done in self.senders.remove(&transfer_id).unwrap_or_default() {
                        let _ = done.send(result.clone());
                    }
                }
                RldpEvent::Received {
                    transfer_id,
                    result,
                } => match (self.receivers.remove(&transfer_id), result) {
                    (Some(done), result) => {
                        let _ = done.send(result);
                    }
                    (None, Ok(data)) => {
                        let _ = self.unsolicited_tx.send((transfer_id, data));
                    }
                    (None, Err(e)) => {
                        trace!("Unsolicited transfer {} failed: {}", transfer_id, e);
                    }
                },
            }
        }
        true
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
