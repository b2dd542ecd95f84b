//! TL structures for the RLDP2 protocol.
//!
//! ```tlb
//! fec.raptorQ data_size:int symbol_size:int symbols_count:int = fec.Type;
//! rldp2.messagePart transfer_id:int256 fec_type:fec.Type part:int total_size:long
//!                   seqno:int data:bytes = rldp2.MessagePart;
//! rldp2.confirm transfer_id:int256 part:int max_seqno:int received_mask:int
//!               received_count:int = rldp2.MessagePart;
//! rldp2.complete transfer_id:int256 part:int = rldp2.MessagePart;
//! ```

use std::fmt;

use rand::RngCore;

use crate::ack::Ack;
use crate::tl::{TlReader, TlWriter};

// ============================================================================
// TL Schema IDs (CRC32 of schema definitions)
// ============================================================================

/// fec.raptorQ data_size:int symbol_size:int symbols_count:int = fec.Type
pub const FEC_RAPTORQ: u32 = 0x19a4f8ba;

/// fec.roundRobin data_size:int symbol_size:int symbols_count:int = fec.Type
pub const FEC_ROUND_ROBIN: u32 = 0x32f528d5;

/// fec.online data_size:int symbol_size:int symbols_count:int = fec.Type
pub const FEC_ONLINE: u32 = 0xe7c59bba;

/// rldp2.messagePart
pub const RLDP2_MESSAGE_PART: u32 = 0x8cadb902;

/// rldp2.confirm
pub const RLDP2_CONFIRM: u32 = 0xa6af9f4d;

/// rldp.complete transfer_id:int256 part:int
pub const RLDP2_COMPLETE: u32 = 0xb71a7818;

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RldpTypeError {
    /// Buffer ended before the field was complete.
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// A nested structure carried the wrong constructor.
    #[error("unexpected schema id: expected 0x{expected:08x}, got 0x{got:08x}")]
    UnexpectedSchemaId { expected: u32, got: u32 },

    /// Top-level constructor is not an RLDP2 message.
    #[error("unknown message type: 0x{0:08x}")]
    UnknownMessageType(u32),

    /// Unknown `fec.Type` constructor.
    #[error("unknown FEC type: 0x{0:08x}")]
    UnknownFecType(u32),

    /// Bytes left over after the message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

// ============================================================================
// Transfer id
// ============================================================================

/// 256-bit transfer identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub [u8; 32]);

impl TransferId {
    /// The all-zero id, which asks [`send`](crate::RldpConnection::send) to
    /// generate a random one.
    pub const ZERO: TransferId = TransferId([0u8; 32]);

    /// Generates a random transfer id.
    pub fn random() -> Self {
        let mut id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Returns true for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Id of the transfer that carries the response to this one
    /// (`id XOR 0xff..ff`).
    pub fn answer_id(&self) -> Self {
        let mut id = self.0;
        id.iter_mut().for_each(|b| *b ^= 0xFF);
        Self(id)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TransferId {
    fn from(id: [u8; 32]) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self)
    }
}

// ============================================================================
// FEC Types
// ============================================================================

/// FEC (Forward Error Correction) type configuration.
///
/// Only RaptorQ is produced or decoded; the other constructors are parsed so
/// that they can be rejected with a precise error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecType {
    /// RaptorQ fountain code.
    RaptorQ {
        data_size: u32,
        symbol_size: u32,
        symbols_count: u32,
    },
    /// Round-robin FEC.
    RoundRobin {
        data_size: u32,
        symbol_size: u32,
        symbols_count: u32,
    },
    /// Online FEC.
    Online {
        data_size: u32,
        symbol_size: u32,
        symbols_count: u32,
    },
}

impl FecType {
    /// Creates a new RaptorQ FEC type with the given parameters.
    pub fn raptorq(data_size: u32, symbol_size: u32, symbols_count: u32) -> Self {
        Self::RaptorQ {
            data_size,
            symbol_size,
            symbols_count,
        }
    }

    fn fields(&self) -> (u32, u32, u32) {
        match *self {
            FecType::RaptorQ {
                data_size,
                symbol_size,
                symbols_count,
            }
            | FecType::RoundRobin {
                data_size,
                symbol_size,
                symbols_count,
            }
            | FecType::Online {
                data_size,
                symbol_size,
                symbols_count,
            } => (data_size, symbol_size, symbols_count),
        }
    }

    /// Returns the size of the encoded part in bytes.
    pub fn data_size(&self) -> u32 {
        self.fields().0
    }

    /// Returns the symbol size.
    pub fn symbol_size(&self) -> u32 {
        self.fields().1
    }

    /// Returns the number of source symbols.
    pub fn symbols_count(&self) -> u32 {
        self.fields().2
    }

    /// Returns the TL schema ID for this FEC type.
    pub fn schema_id(&self) -> u32 {
        match self {
            FecType::RaptorQ { .. } => FEC_RAPTORQ,
            FecType::RoundRobin { .. } => FEC_ROUND_ROBIN,
            FecType::Online { .. } => FEC_ONLINE,
        }
    }

    /// Serializes the FEC type to TL format.
    pub fn write_to(&self, writer: &mut TlWriter) {
        let (data_size, symbol_size, symbols_count) = self.fields();
        writer
            .write_u32(self.schema_id())
            .write_u32(data_size)
            .write_u32(symbol_size)
            .write_u32(symbols_count);
    }

    /// Deserializes a FEC type from TL format.
    pub fn read_from(reader: &mut TlReader) -> Result<Self, RldpTypeError> {
        let schema_id = reader.read_u32()?;
        let data_size = reader.read_u32()?;
        let symbol_size = reader.read_u32()?;
        let symbols_count = reader.read_u32()?;

        match schema_id {
            FEC_RAPTORQ => Ok(FecType::RaptorQ {
                data_size,
                symbol_size,
                symbols_count,
            }),
            FEC_ROUND_ROBIN => Ok(FecType::RoundRobin {
                data_size,
                symbol_size,
                symbols_count,
            }),
            FEC_ONLINE => Ok(FecType::Online {
                data_size,
                symbol_size,
                symbols_count,
            }),
            _ => Err(RldpTypeError::UnknownFecType(schema_id)),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// One FEC symbol of one part of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// FEC parameters of this part.
    pub fec_type: FecType,
    /// Part index within the transfer.
    pub part: u32,
    /// Total size of the whole transfer.
    pub total_size: u64,
    /// Symbol sequence number within the part.
    pub seqno: u32,
    /// Symbol data.
    pub data: Vec<u8>,
}

impl MessagePart {
    fn write_to(&self, writer: &mut TlWriter) {
        writer
            .write_u32(RLDP2_MESSAGE_PART)
            .write_int256(self.transfer_id.as_bytes());
        self.fec_type.write_to(writer);
        writer
            .write_u32(self.part)
            .write_u64(self.total_size)
            .write_u32(self.seqno)
            .write_bytes(&self.data);
    }

    fn read_body(reader: &mut TlReader) -> Result<Self, RldpTypeError> {
        Ok(Self {
            transfer_id: TransferId(reader.read_int256()?),
            fec_type: FecType::read_from(reader)?,
            part: reader.read_u32()?,
            total_size: reader.read_u64()?,
            seqno: reader.read_u32()?,
            data: reader.read_bytes()?,
        })
    }
}

/// Acknowledgement for one part of an outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirm {
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Part index.
    pub part: u32,
    /// Highest received seqno.
    pub max_seqno: u32,
    /// Bit `i` set when `max_seqno - i` was received.
    pub received_mask: u32,
    /// Total number of distinct symbols received.
    pub received_count: u32,
}

impl Confirm {
    /// Builds a confirm carrying `ack`.
    pub fn new(transfer_id: TransferId, part: u32, ack: &Ack) -> Self {
        Self {
            transfer_id,
            part,
            max_seqno: ack.max_seqno,
            received_mask: ack.received_mask,
            received_count: ack.received_count,
        }
    }

    /// Returns the acknowledgement summary carried by this confirm.
    pub fn ack(&self) -> Ack {
        Ack {
            max_seqno: self.max_seqno,
            received_mask: self.received_mask,
            received_count: self.received_count,
        }
    }

    fn write_to(&self, writer: &mut TlWriter) {
        writer
            .write_u32(RLDP2_CONFIRM)
            .write_int256(self.transfer_id.as_bytes())
            .write_u32(self.part)
            .write_u32(self.max_seqno)
            .write_u32(self.received_mask)
            .write_u32(self.received_count);
    }

    fn read_body(reader: &mut TlReader) -> Result<Self, RldpTypeError> {
        Ok(Self {
            transfer_id: TransferId(reader.read_int256()?),
            part: reader.read_u32()?,
            max_seqno: reader.read_u32()?,
            received_mask: reader.read_u32()?,
            received_count: reader.read_u32()?,
        })
    }
}

/// Notice that a part has been fully received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Complete {
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Part index.
    pub part: u32,
}

impl Complete {
    /// Creates a new complete notice.
    pub fn new(transfer_id: TransferId, part: u32) -> Self {
        Self { transfer_id, part }
    }

    fn write_to(&self, writer: &mut TlWriter) {
        writer
            .write_u32(RLDP2_COMPLETE)
            .write_int256(self.transfer_id.as_bytes())
            .write_u32(self.part);
    }

    fn read_body(reader: &mut TlReader) -> Result<Self, RldpTypeError> {
        Ok(Self {
            transfer_id: TransferId(reader.read_int256()?),
            part: reader.read_u32()?,
        })
    }
}

/// Any RLDP2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RldpMessage {
    MessagePart(MessagePart),
    Confirm(Confirm),
    Complete(Complete),
}

impl RldpMessage {
    /// Returns the schema ID for this message type.
    pub fn schema_id(&self) -> u32 {
        match self {
            RldpMessage::MessagePart(_) => RLDP2_MESSAGE_PART,
            RldpMessage::Confirm(_) => RLDP2_CONFIRM,
            RldpMessage::Complete(_) => RLDP2_COMPLETE,
        }
    }

    /// Returns the transfer this message belongs to.
    pub fn transfer_id(&self) -> TransferId {
        match self {
            RldpMessage::MessagePart(m) => m.transfer_id,
            RldpMessage::Confirm(m) => m.transfer_id,
            RldpMessage::Complete(m) => m.transfer_id,
        }
    }

    /// Serializes to a byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = match self {
            RldpMessage::MessagePart(m) => TlWriter::with_capacity(m.data.len() + 80),
            _ => TlWriter::with_capacity(48),
        };
        match self {
            RldpMessage::MessagePart(m) => m.write_to(&mut writer),
            RldpMessage::Confirm(m) => m.write_to(&mut writer),
            RldpMessage::Complete(m) => m.write_to(&mut writer),
        }
        writer.finish()
    }

    /// Parses a whole datagram.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RldpTypeError> {
        let mut reader = TlReader::new(data);
        let message = match reader.read_u32()? {
            RLDP2_MESSAGE_PART => RldpMessage::MessagePart(MessagePart::read_body(&mut reader)?),
            RLDP2_CONFIRM => RldpMessage::Confirm(Confirm::read_body(&mut reader)?),
            RLDP2_COMPLETE => RldpMessage::Complete(Complete::read_body(&mut reader)?),
            other => return Err(RldpTypeError::UnknownMessageType(other)),
        };

        if !reader.is_empty() {
            return Err(RldpTypeError::TrailingBytes(reader.remaining_len()));
        }
        Ok(message)
    }
}

impl From<MessagePart> for RldpMessage {
    fn from(m: MessagePart) -> Self {
        RldpMessage::MessagePart(m)
    }
}

impl From<Confirm> for RldpMessage {
    fn from(m: Confirm) -> Self {
        RldpMessage::Confirm(m)
    }
}

impl From<Complete> for RldpMessage {
    fn from(m: Complete) -> Self {
        RldpMessage::Complete(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_id_xor() {
        let id = TransferId([0x0F; 32]);
        assert_eq!(id.answer_id(), TransferId([0xF0; 32]));
        assert_eq!(id.answer_id().answer_id(), id);
        assert!(TransferId::ZERO.is_zero());
        assert!(!TransferId::random().is_zero());
    }

    #[test]
    fn test_message_part_roundtrip() {
        let original = RldpMessage::MessagePart(MessagePart {
            transfer_id: TransferId([42u8; 32]),
            fec_type: FecType::raptorq(1024, 768, 2),
            part: 3,
            total_size: 5_000_001,
            seqno: 17,
            data: vec![7u8; 768],
        });

        let bytes = original.to_bytes();
        assert_eq!(&bytes[..4], &RLDP2_MESSAGE_PART.to_le_bytes());
        assert_eq!(RldpMessage::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn test_confirm_carries_ack() {
        let ack = Ack {
            max_seqno: 10,
            received_mask: 0b1011,
            received_count: 3,
        };
        let confirm = Confirm::new(TransferId([1u8; 32]), 0, &ack);
        let parsed = RldpMessage::from_bytes(&RldpMessage::from(confirm).to_bytes()).unwrap();

        match parsed {
            RldpMessage::Confirm(c) => assert_eq!(c.ack(), ack),
            other => panic!("Expected confirm, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_trailing() {
        let mut bytes = RldpMessage::from(Complete::new(TransferId([2u8; 32]), 1)).to_bytes();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            RldpMessage::from_bytes(&bytes),
            Err(RldpTypeError::TrailingBytes(2))
        );

        assert_eq!(
            RldpMessage::from_bytes(&0x12345678u32.to_le_bytes()),
            Err(RldpTypeError::UnknownMessageType(0x12345678))
        );
    }

    #[test]
    fn test_unknown_fec_type() {
        let mut writer = TlWriter::new();
        writer.write_u32(0x01020304).write_u32(1).write_u32(2).write_u32(3);
        let bytes = writer.finish();
        assert_eq!(
            FecType::read_from(&mut TlReader::new(&bytes)),
            Err(RldpTypeError::UnknownFecType(0x01020304))
        );
    }
}
