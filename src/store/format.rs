//! Binary formats for persisted matrix artifacts.
//!
//! Two envelope kinds share one family: block matrices (`KMB1`) and the
//! reconstructed global matrix (`KMF1`). Both are a fixed-size header,
//! a little-endian row-major `f64` payload, and a 16-byte blake3
//! checksum over the payload. Readers memory-map the file, validate the
//! header and checksum, and copy the payload into an `Array2<f64>`.
//!
//! Block headers carry the batch's manifest digest prefix, so a merge
//! run can tell a stale or foreign block from one computed under the
//! manifest it is operating on.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{KmatrixError, Result};

// ── Constants ──────────────────────────────────────────────────────

/// Magic bytes for block matrix files
pub const BLOCK_MAGIC: [u8; 4] = *b"KMB1";

/// Magic bytes for the final global matrix file
pub const FINAL_MAGIC: [u8; 4] = *b"KMF1";

/// Format version shared by both envelopes
pub const FORMAT_VERSION: u16 = 1;

/// Block header size in bytes (fixed)
pub const BLOCK_HEADER_SIZE: usize = 64;

/// Final matrix header size in bytes (fixed)
pub const FINAL_HEADER_SIZE: usize = 48;

/// Truncated blake3 checksum appended after the payload
pub const CHECKSUM_SIZE: usize = 16;

// ── Block Header ───────────────────────────────────────────────────

/// Block matrix header, exactly 64 bytes on disk.
///
/// ```text
/// Offset  Size  Field
/// 0       4     magic: b"KMB1"
/// 4       2     version: u16 = 1
/// 6       2     reserved: 0x0000
/// 8       4     pair_i: u32
/// 12      4     pair_j: u32
/// 16      8     left_len: u64   (records in subset i)
/// 24      8     right_len: u64  (records in subset j)
/// 32      16    manifest_digest: u128 (first 16 digest bytes, LE)
/// 48      8     payload_len: u64 (= (left+right)^2 * 8)
/// 56      8     reserved: 0x00
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub pair_i: u32,
    pub pair_j: u32,
    pub left_len: u64,
    pub right_len: u64,
    pub manifest_digest: u128,
    pub payload_len: u64,
}

impl BlockHeader {
    pub fn new(
        pair_i: usize,
        pair_j: usize,
        left_len: usize,
        right_len: usize,
        manifest_digest: u128,
    ) -> Self {
        let dim = (left_len + right_len) as u64;
        Self {
            magic: BLOCK_MAGIC,
            version: FORMAT_VERSION,
            pair_i: pair_i as u32,
            pair_j: pair_j as u32,
            left_len: left_len as u64,
            right_len: right_len as u64,
            manifest_digest,
            payload_len: dim * dim * 8,
        }
    }

    /// Side length of the block matrix.
    pub fn dim(&self) -> usize {
        (self.left_len + self.right_len) as usize
    }

    /// Subset pair this block was computed for.
    pub fn pair(&self) -> (usize, usize) {
        (self.pair_i as usize, self.pair_j as usize)
    }

    /// Validate header fields.
    pub fn validate(&self) -> Result<()> {
        if self.magic != BLOCK_MAGIC {
            return Err(KmatrixError::InvalidFormat(format!(
                "not a block matrix file: expected KMB1, got {:?}",
                self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(KmatrixError::InvalidFormat(format!(
                "unsupported block format version: {}",
                self.version
            )));
        }
        if self.pair_i >= self.pair_j {
            return Err(KmatrixError::InvalidFormat(format!(
                "invalid block pair ({}, {}): expected i < j",
                self.pair_i, self.pair_j
            )));
        }
        let dim = self.left_len + self.right_len;
        if self.payload_len != dim * dim * 8 {
            return Err(KmatrixError::InvalidFormat(format!(
                "payload length {} does not match dimension {}",
                self.payload_len, dim
            )));
        }
        Ok(())
    }

    /// Parse header from byte slice (>= BLOCK_HEADER_SIZE bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(KmatrixError::InvalidFormat(
                "file too small for block header".into(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let header = Self {
            magic,
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            pair_i: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            pair_j: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            left_len: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            right_len: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            manifest_digest: u128::from_le_bytes(bytes[32..48].try_into().unwrap()),
            payload_len: u64::from_le_bytes(bytes[48..56].try_into().unwrap()),
        };
        header.validate()?;
        Ok(header)
    }

    /// Write header to writer (exactly BLOCK_HEADER_SIZE bytes).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?; // reserved
        writer.write_all(&self.pair_i.to_le_bytes())?;
        writer.write_all(&self.pair_j.to_le_bytes())?;
        writer.write_all(&self.left_len.to_le_bytes())?;
        writer.write_all(&self.right_len.to_le_bytes())?;
        writer.write_all(&self.manifest_digest.to_le_bytes())?;
        writer.write_all(&self.payload_len.to_le_bytes())?;
        writer.write_all(&[0u8; 8])?; // reserved
        Ok(())
    }
}

// ── Final Matrix Header ────────────────────────────────────────────

/// Global matrix header, exactly 48 bytes on disk.
///
/// ```text
/// Offset  Size  Field
/// 0       4     magic: b"KMF1"
/// 4       2     version: u16 = 1
/// 6       2     reserved: 0x0000
/// 8       8     order: u64 (N, matrix is N x N)
/// 16      16    manifest_digest: u128 (first 16 digest bytes, LE)
/// 32      8     payload_len: u64 (= N^2 * 8)
/// 40      8     reserved: 0x00
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub order: u64,
    pub manifest_digest: u128,
    pub payload_len: u64,
}

impl FinalHeader {
    pub fn new(order: usize, manifest_digest: u128) -> Self {
        let n = order as u64;
        Self {
            magic: FINAL_MAGIC,
            version: FORMAT_VERSION,
            order: n,
            manifest_digest,
            payload_len: n * n * 8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != FINAL_MAGIC {
            return Err(KmatrixError::InvalidFormat(format!(
                "not a final matrix file: expected KMF1, got {:?}",
                self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(KmatrixError::InvalidFormat(format!(
                "unsupported final matrix version: {}",
                self.version
            )));
        }
        if self.payload_len != self.order * self.order * 8 {
            return Err(KmatrixError::InvalidFormat(format!(
                "payload length {} does not match order {}",
                self.payload_len, self.order
            )));
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FINAL_HEADER_SIZE {
            return Err(KmatrixError::InvalidFormat(
                "file too small for final matrix header".into(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let header = Self {
            magic,
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            order: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            manifest_digest: u128::from_le_bytes(bytes[16..32].try_into().unwrap()),
            payload_len: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
        };
        header.validate()?;
        Ok(header)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?; // reserved
        writer.write_all(&self.order.to_le_bytes())?;
        writer.write_all(&self.manifest_digest.to_le_bytes())?;
        writer.write_all(&self.payload_len.to_le_bytes())?;
        writer.write_all(&[0u8; 8])?; // reserved
        Ok(())
    }
}

// ── Read / Write ───────────────────────────────────────────────────

fn encode_payload(matrix: &Array2<f64>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(matrix.len() * 8);
    for &v in matrix.iter() {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload
}

fn decode_payload(bytes: &[u8], dim: usize) -> Result<Array2<f64>> {
    let values: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Array2::from_shape_vec((dim, dim), values)
        .map_err(|e| KmatrixError::InvalidFormat(format!("payload shape: {}", e)))
}

/// Payload + checksum section following a header of `header_size` bytes.
fn checked_payload(bytes: &[u8], header_size: usize, payload_len: usize) -> Result<&[u8]> {
    let expected_len = header_size + payload_len + CHECKSUM_SIZE;
    if bytes.len() != expected_len {
        return Err(KmatrixError::InvalidFormat(format!(
            "file length {} does not match expected {}",
            bytes.len(),
            expected_len
        )));
    }
    let payload = &bytes[header_size..header_size + payload_len];
    let checksum = &bytes[header_size + payload_len..];
    if checksum != &blake3::hash(payload).as_bytes()[..CHECKSUM_SIZE] {
        return Err(KmatrixError::InvalidFormat(
            "payload checksum mismatch".to_string(),
        ));
    }
    Ok(payload)
}

/// Write a block artifact: header, payload, checksum.
///
/// Fails if the matrix dimensions disagree with the header.
pub fn write_block<W: Write>(
    writer: &mut W,
    header: &BlockHeader,
    matrix: &Array2<f64>,
) -> Result<()> {
    header.validate()?;
    if matrix.dim() != (header.dim(), header.dim()) {
        return Err(KmatrixError::InvalidFormat(format!(
            "matrix shape {:?} does not match header dimension {}",
            matrix.dim(),
            header.dim()
        )));
    }
    let payload = encode_payload(matrix);
    header.write_to(writer)?;
    writer.write_all(&payload)?;
    writer.write_all(&blake3::hash(&payload).as_bytes()[..CHECKSUM_SIZE])?;
    Ok(())
}

/// Parse a block artifact from raw bytes.
pub fn block_from_bytes(bytes: &[u8]) -> Result<(BlockHeader, Array2<f64>)> {
    let header = BlockHeader::from_bytes(bytes)?;
    let payload = checked_payload(bytes, BLOCK_HEADER_SIZE, header.payload_len as usize)?;
    let matrix = decode_payload(payload, header.dim())?;
    Ok((header, matrix))
}

/// Read a block artifact from a file (memory-mapped).
pub fn read_block(path: &Path) -> Result<(BlockHeader, Array2<f64>)> {
    let file = File::open(path).map_err(KmatrixError::Io)?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(KmatrixError::Io)?;
    block_from_bytes(&mmap)
}

/// Write the final global matrix artifact.
pub fn write_final<W: Write>(
    writer: &mut W,
    header: &FinalHeader,
    matrix: &Array2<f64>,
) -> Result<()> {
    header.validate()?;
    let order = header.order as usize;
    if matrix.dim() != (order, order) {
        return Err(KmatrixError::InvalidFormat(format!(
            "matrix shape {:?} does not match order {}",
            matrix.dim(),
            order
        )));
    }
    let payload = encode_payload(matrix);
    header.write_to(writer)?;
    writer.write_all(&payload)?;
    writer.write_all(&blake3::hash(&payload).as_bytes()[..CHECKSUM_SIZE])?;
    Ok(())
}

/// Parse a final matrix artifact from raw bytes.
pub fn final_from_bytes(bytes: &[u8]) -> Result<(FinalHeader, Array2<f64>)> {
    let header = FinalHeader::from_bytes(bytes)?;
    let payload = checked_payload(bytes, FINAL_HEADER_SIZE, header.payload_len as usize)?;
    let matrix = decode_payload(payload, header.order as usize)?;
    Ok((header, matrix))
}

/// Read the final matrix artifact from a file (memory-mapped).
pub fn read_final(path: &Path) -> Result<(FinalHeader, Array2<f64>)> {
    let file = File::open(path).map_err(KmatrixError::Io)?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(KmatrixError::Io)?;
    final_from_bytes(&mmap)
}
