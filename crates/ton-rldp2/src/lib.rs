//! # ton-rldp2
//!
//! RLDP2 (Reliable Large Datagram Protocol, version 2) for the TON network.
//!
//! RLDP2 moves arbitrarily large byte payloads over an unreliable datagram
//! channel. Payloads are cut into parts of up to 2 MB, each part is encoded
//! with RaptorQ, and the receiver reconstructs a part from any sufficient
//! set of symbols. Per-part selective acknowledgements feed RTT, bandwidth
//! and loss estimators, which drive a BBR-style controller and a pacer
//! shared by every transfer on the connection.
//!
//! ## Protocol Flow
//!
//! ```text
//! Sender                                              Receiver
//!    |                                                    |
//!    |  ────── rldp2.messagePart (part=0, seqno=0) ─────> |
//!    |  ────── rldp2.messagePart (part=0, seqno=1) ─────> |
//!    |  (seqno=2 lost)                                    |
//!    |  ────── rldp2.messagePart (part=0, seqno=3) ─────> |
//!    |                                                    |
//!    |  <──── rldp2.confirm (max_seqno=3,                 |
//!    |                       mask=0b1011,                 |
//!    |                       count=3) ────────────────────|
//!    |                                                    |
//!    |  (seqno=2 declared lost, fresh symbols follow)     |
//!    |  ────── rldp2.messagePart (part=0, seqno=4) ─────> |
//!    |                                                    |
//!    |  <───────────── rldp2.complete (part=0) ───────────|
//! ```
//!
//! ## Layout
//!
//! - [`ack`], [`rtt`], [`bandwidth`], [`loss`]: estimators fed by confirms
//! - [`bbr`], [`pacer`]: rate and window control
//! - [`sender_packets`], [`sender`], [`receiver`]: per-part state machines
//! - [`fec`]: RaptorQ encoder, decoder and symbol budget
//! - [`outbound`], [`inbound`]: part sequencing of one transfer
//! - [`connection`]: the sans-io connection
//! - [`driver`]: a tokio task around a connection
//!
//! ## Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use ton_rldp2::{RldpConnection, RldpEvent, TransferId};
//!
//! let mut now = Instant::now();
//! let mut alice = RldpConnection::default();
//! let mut bob = RldpConnection::default();
//!
//! let id = alice.send(TransferId::ZERO, b"hello over rldp2".to_vec(), None);
//!
//! let mut received = None;
//! while received.is_none() {
//!     alice.run(now);
//!     while let Some(datagram) = alice.poll_transmit() {
//!         bob.on_datagram(&datagram, now);
//!     }
//!     bob.run(now);
//!     while let Some(datagram) = bob.poll_transmit() {
//!         alice.on_datagram(&datagram, now);
//!     }
//!     received = bob.poll_event();
//!     now += Duration::from_millis(10);
//! }
//!
//! assert_eq!(
//!     received,
//!     Some(RldpEvent::Received {
//!         transfer_id: id,
//!         result: Ok(b"hello over rldp2".to_vec()),
//!     })
//! );
//! ```

pub mod ack;
pub mod bandwidth;
pub mod bbr;
pub mod config;
pub mod connection;
pub mod driver;
mod error;
pub mod fec;
pub mod inbound;
pub mod loss;
pub mod outbound;
pub mod pacer;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod sender_packets;
mod tl;
pub mod types;
mod windowed;

// Re-export main types
pub use error::{RldpError, Result};

pub use ack::{ACK_WINDOW, Ack};
pub use bandwidth::{BdwSnapshot, BdwStats};
pub use bbr::{Bbr, BbrState};
pub use config::{
    COMPLETED_CACHE_SIZE, DEFAULT_ACK_DELAY, DEFAULT_INITIAL_RTT, DEFAULT_MIN_PACING_RATE,
    DEFAULT_MTU, DEFAULT_PACER_CAPACITY, DEFAULT_PACER_GRANULARITY, DEFAULT_RECEIVE_TIMEOUT,
    MAX_PARTS_IN_FLIGHT, RldpConfig,
};
pub use connection::{ConnectionStats, RldpConnection, RldpEvent};
pub use driver::{RldpHandle, spawn_connection};
pub use fec::{FecDecoder, FecEncoder, FecHelper, PART_SIZE, SYMBOL_SIZE};
pub use inbound::{InboundEvent, InboundTransfer};
pub use loss::{LossProbability, LossStats};
pub use outbound::{OutboundStep, OutboundTransfer};
pub use pacer::Pacer;
pub use receiver::{ReceiverAction, RldpReceiver};
pub use rtt::RttStats;
pub use sender::{AckOutcome, RldpSender, SenderAction};
pub use sender_packets::{SenderPackets, SentPacket};

pub use types::{
    Complete, Confirm, FecType, MessagePart, RldpMessage, RldpTypeError, TransferId,
    // Schema IDs
    FEC_ONLINE, FEC_RAPTORQ, FEC_ROUND_ROBIN, RLDP2_COMPLETE, RLDP2_CONFIRM, RLDP2_MESSAGE_PART,
};
