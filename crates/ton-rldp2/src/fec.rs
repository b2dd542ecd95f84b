//! Forward Error Correction (FEC) for RLDP2 parts using RaptorQ.
//!
//! Every part of a transfer is encoded as one RaptorQ source block with
//! 768-byte symbols. The symbol with seqno `n` is the RaptorQ encoding symbol
//! with ESI `n`: seqnos below `symbols_count` are source symbols, the rest are
//! repair symbols generated on demand.
//!
//! ```text
//!   part bytes ──► FecEncoder::gen_symbol(seqno) ──► messagePart.data
//!                                                          │
//!   part bytes ◄── FecDecoder::take_decoded() ◄── add_symbol(seqno, data)
//! ```
//!
//! [`FecHelper`] is the sender-side notion of "how many more symbols does the
//! receiver still need".

use raptorq::{Decoder, Encoder, EncodingPacket, ObjectTransmissionInformation, PayloadId};

use crate::error::{RldpError, Result};
use crate::types::FecType;

/// Symbol size in bytes.
pub const SYMBOL_SIZE: usize = 768;

/// Maximum number of bytes carried by a single part.
pub const PART_SIZE: usize = 2_000_000;

/// RaptorQ encoding symbol ids are 24 bits wide.
const MAX_ESI: u32 = 1 << 24;

/// Minimum number of repair symbols the sender budgets above `symbols_count`.
const MIN_FEC_MARGIN: u32 = 5;

/// Number of source symbols a part of `data_size` bytes is encoded into.
///
/// An empty part still carries one (padding) symbol.
pub fn symbols_for(data_size: usize, symbol_size: usize) -> u32 {
    data_size.div_ceil(symbol_size).max(1) as u32
}

/// Checks that `fec_type` describes a part this implementation can decode.
pub fn validate_fec_type(fec_type: &FecType) -> Result<()> {
    let FecType::RaptorQ {
        data_size,
        symbol_size,
        symbols_count,
    } = *fec_type
    else {
        return Err(RldpError::InvalidFecType(format!(
            "unsupported FEC constructor 0x{:08x}",
            fec_type.schema_id()
        )));
    };

    if symbol_size as usize != SYMBOL_SIZE {
        return Err(RldpError::InvalidFecType(format!(
            "symbol size {} (expected {})",
            symbol_size, SYMBOL_SIZE
        )));
    }
    if data_size as usize > PART_SIZE {
        return Err(RldpError::InvalidFecType(format!(
            "part data size {} exceeds {}",
            data_size, PART_SIZE
        )));
    }
    if symbols_count != symbols_for(data_size as usize, SYMBOL_SIZE) {
        return Err(RldpError::InvalidFecType(format!(
            "symbols count {} does not match data size {}",
            symbols_count, data_size
        )));
    }
    Ok(())
}

// ============================================================================
// Encoder
// ============================================================================

/// RaptorQ encoder for one part.
pub struct FecEncoder {
    encoder: Encoder,
    source: Vec<Vec<u8>>,
    fec_type: FecType,
}

impl FecEncoder {
    /// Creates a new encoder over `data` with the standard 768-byte symbols.
    pub fn new(data: &[u8]) -> Self {
        let data_size = data.len();
        // RaptorQ cannot encode an empty object; one zero byte stands in and
        // the decoder side knows the real size is zero.
        let encoder = if data.is_empty() {
            Encoder::with_defaults(&[0u8], SYMBOL_SIZE as u16)
        } else {
            Encoder::with_defaults(data, SYMBOL_SIZE as u16)
        };

        let source: Vec<Vec<u8>> = encoder
            .get_block_encoders()
            .first()
            .map(|block| {
                block
                    .source_packets()
                    .into_iter()
                    .map(|packet| packet.data().to_vec())
                    .collect()
            })
            .unwrap_or_default();

        let fec_type = FecType::raptorq(
            data_size as u32,
            SYMBOL_SIZE as u32,
            symbols_for(data_size, SYMBOL_SIZE),
        );

        Self {
            encoder,
            source,
            fec_type,
        }
    }

    /// Returns the FEC parameters advertised in every message part.
    pub fn fec_type(&self) -> FecType {
        self.fec_type
    }

    /// Returns the number of source symbols.
    pub fn symbols_count(&self) -> u32 {
        self.source.len() as u32
    }

    /// Generates the symbol with the given seqno.
    pub fn gen_symbol(&self, seqno: u32) -> Vec<u8> {
        if let Some(symbol) = self.source.get(seqno as usize) {
            return symbol.clone();
        }

        let repair_index = seqno - self.symbols_count();
        self.encoder
            .get_block_encoders()
            .first()
            .and_then(|block| block.repair_packets(repair_index, 1).into_iter().next())
            .map(|packet| packet.data().to_vec())
            .unwrap_or_else(|| vec![0u8; SYMBOL_SIZE])
    }
}

impl std::fmt::Debug for FecEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FecEncoder")
            .field("fec_type", &self.fec_type)
            .finish()
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// RaptorQ decoder for one part.
///
/// Symbols are validated before they reach `raptorq`: the seqno must fit in a
/// 24-bit ESI and the payload must be exactly one symbol long.
pub struct FecDecoder {
    decoder: Option<Decoder>,
    data_size: usize,
    symbols_received: u32,
    decoded: Option<Vec<u8>>,
    is_complete: bool,
}

impl FecDecoder {
    /// Creates a decoder for the part described by `fec_type`.
    pub fn new(fec_type: &FecType) -> Result<Self> {
        validate_fec_type(fec_type)?;

        let data_size = fec_type.data_size() as usize;
        let decoder = (data_size > 0).then(|| {
            Decoder::new(ObjectTransmissionInformation::with_defaults(
                data_size as u64,
                SYMBOL_SIZE as u16,
            ))
        });

        Ok(Self {
            decoder,
            data_size,
            symbols_received: 0,
            decoded: None,
            is_complete: false,
        })
    }

    /// Returns the part size in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Returns the number of symbols fed so far.
    pub fn symbols_received(&self) -> u32 {
        self.symbols_received
    }

    /// Returns true once the part has been recovered.
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Feeds one symbol. Returns `Ok(true)` when the part became decodable.
    pub fn add_symbol(&mut self, seqno: u32, data: &[u8]) -> Result<bool> {
        if self.is_complete {
            return Ok(true);
        }
        if seqno >= MAX_ESI {
            return Err(RldpError::violation(format!(
                "symbol seqno {} out of range",
                seqno
            )));
        }
        if data.len() != SYMBOL_SIZE {
            return Err(RldpError::InvalidDataSize(format!(
                "symbol of {} bytes (expected {})",
                data.len(),
                SYMBOL_SIZE
            )));
        }

        self.symbols_received += 1;

        let Some(decoder) = self.decoder.as_mut() else {
            self.decoded = Some(Vec::new());
            self.is_complete = true;
            return Ok(true);
        };

        let packet = EncodingPacket::new(PayloadId::new(0, seqno), data.to_vec());
        if let Some(mut decoded) = decoder.decode(packet) {
            decoded.truncate(self.data_size);
            if decoded.len() != self.data_size {
                return Err(RldpError::violation("decoded part is shorter than declared"));
            }
            self.decoded = Some(decoded);
            self.is_complete = true;
            self.decoder = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Takes the recovered bytes, if decoding is complete.
    pub fn take_decoded(&mut self) -> Option<Vec<u8>> {
        self.decoded.take()
    }
}

impl std::fmt::Debug for FecDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FecDecoder")
            .field("data_size", &self.data_size)
            .field("symbols_received", &self.symbols_received)
            .field("is_complete", &self.is_complete)
            .finish()
    }
}

// ============================================================================
// FEC helper
// ============================================================================

/// Sender-side estimate of how many symbols the receiver still needs.
///
/// The target is `symbols_count` plus a margin of `max(5, symbols_count / 20)`.
/// Once the receiver confirms the target without completing the part, the
/// target grows by another margin step.
#[derive(Debug, Clone)]
pub struct FecHelper {
    symbols_count: u32,
    received_symbols_count: u32,
    fec_symbols_count: u32,
}

impl FecHelper {
    /// Creates a new helper for a part with `symbols_count` source symbols.
    pub fn new(symbols_count: u32) -> Self {
        let mut helper = Self {
            symbols_count,
            received_symbols_count: 0,
            fec_symbols_count: 0,
        };
        helper.fec_symbols_count = symbols_count + helper.margin();
        helper
    }

    fn margin(&self) -> u32 {
        (self.symbols_count / 20).max(MIN_FEC_MARGIN)
    }

    /// Returns the number of source symbols.
    pub fn symbols_count(&self) -> u32 {
        self.symbols_count
    }

    /// Returns the receiver's confirmed symbol count.
    pub fn received_symbols_count(&self) -> u32 {
        self.received_symbols_count
    }

    /// Records the receiver's confirmed symbol count.
    pub fn set_received_symbols_count(&mut self, count: u32) {
        self.received_symbols_count = self.received_symbols_count.max(count);
        while self.fec_symbols_count <= self.received_symbols_count {
            self.fec_symbols_count += self.margin();
        }
    }

    /// Symbols still to be delivered before the part should be decodable.
    /// Always at least one.
    pub fn left_fec_symbols_count(&self) -> u32 {
        self.fec_symbols_count - self.received_symbols_count
    }
}
