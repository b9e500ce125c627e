//! Core types for CryptoNote mining
//!
//! Block templates as handed out by the daemon, the parameters of a single
//! mining attempt, and the hashing blob the proof-of-work search runs over.

use crate::serialization::{
    read_bytes, read_hash, read_hashes, read_len, read_u32, read_varint, read_varint_u8,
    write_bytes, write_hash, write_hashes, write_u32, write_varint,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

/// Original block format without a parent block
pub const BLOCK_MAJOR_VERSION_1: u8 = 1;
/// First block format carrying a parent block for merge mining
pub const BLOCK_MAJOR_VERSION_2: u8 = 2;
pub const BLOCK_MAJOR_VERSION_3: u8 = 3;

/// 32-byte hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, std::hash::Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const SIZE: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a hash from a slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::serialization(format!(
                "Invalid hash length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Interpret the hash as four little-endian 64-bit words, lowest first
    pub fn to_words(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (i, chunk) in self.0.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            words[i] = u64::from_le_bytes(word);
        }
        words
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::serialization(format!("Invalid hex in hash: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Output of a base (coinbase) transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub key: Hash,
}

/// Base transaction of a block or parent block.
///
/// Only the coinbase shape is modelled: a single height input, key outputs
/// and the free-form extra field that carries the merge-mining tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub version: u8,
    pub unlock_time: u64,
    pub height: u64,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

impl Transaction {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.version as u64)?;
        write_varint(writer, self.unlock_time)?;
        write_varint(writer, self.height)?;
        write_varint(writer, self.outputs.len() as u64)?;
        for output in &self.outputs {
            write_varint(writer, output.amount)?;
            write_hash(writer, &output.key)?;
        }
        write_bytes(writer, &self.extra)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let version = read_varint_u8(reader, "transaction version")?;
        let unlock_time = read_varint(reader)?;
        let height = read_varint(reader)?;

        let output_count = read_len(reader, "outputs")?;
        let mut outputs = Vec::with_capacity(output_count.min(256));
        for _ in 0..output_count {
            let amount = read_varint(reader)?;
            let key = read_hash(reader)?;
            outputs.push(TransactionOutput { amount, key });
        }

        let extra = read_bytes(reader, "extra")?;

        Ok(Self {
            version,
            unlock_time,
            height,
            outputs,
            extra,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// Parent block embedded in merge-mined blocks (major version 2 and above)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParentBlock {
    pub major_version: u8,
    pub minor_version: u8,
    pub previous_block_hash: Hash,
    pub transaction_count: u64,
    pub base_transaction_branch: Vec<Hash>,
    pub base_transaction: Transaction,
    pub blockchain_branch: Vec<Hash>,
}

impl ParentBlock {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.major_version as u64)?;
        write_varint(writer, self.minor_version as u64)?;
        write_hash(writer, &self.previous_block_hash)?;
        write_varint(writer, self.transaction_count)?;
        write_hashes(writer, &self.base_transaction_branch)?;
        self.base_transaction.write_to(writer)?;
        write_hashes(writer, &self.blockchain_branch)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            major_version: read_varint_u8(reader, "parent major version")?,
            minor_version: read_varint_u8(reader, "parent minor version")?,
            previous_block_hash: read_hash(reader)?,
            transaction_count: read_varint(reader)?,
            base_transaction_branch: read_hashes(reader, "base transaction branch")?,
            base_transaction: Transaction::read_from(reader)?,
            blockchain_branch: read_hashes(reader, "blockchain branch")?,
        })
    }
}

/// Block template handed out by the daemon, and the mined block once a
/// valid nonce has been set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash,
    pub nonce: u32,
    /// Present exactly when `major_version >= 2`
    pub parent_block: Option<ParentBlock>,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl BlockTemplate {
    /// Whether this block format carries an auxiliary-chain merge-mining tag
    pub fn supports_merge_mining(&self) -> bool {
        self.major_version == BLOCK_MAJOR_VERSION_2 || self.major_version >= BLOCK_MAJOR_VERSION_3
    }

    /// Number of transactions including the base transaction
    pub fn transaction_count(&self) -> u64 {
        self.transaction_hashes.len() as u64 + 1
    }

    /// Serialize the header fields (versions, timestamp, previous hash, nonce)
    pub fn write_header<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.major_version as u64)?;
        write_varint(writer, self.minor_version as u64)?;
        write_varint(writer, self.timestamp)?;
        write_hash(writer, &self.previous_block_hash)?;
        write_u32(writer, self.nonce)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.write_header(writer)?;

        match (&self.parent_block, self.major_version >= BLOCK_MAJOR_VERSION_2) {
            (Some(parent), true) => parent.write_to(writer)?,
            (None, false) => {}
            (None, true) => {
                return Err(Error::serialization(format!(
                    "Block major version {} requires a parent block",
                    self.major_version
                )))
            }
            (Some(_), false) => {
                return Err(Error::serialization(format!(
                    "Block major version {} cannot carry a parent block",
                    self.major_version
                )))
            }
        }

        self.base_transaction.write_to(writer)?;
        write_hashes(writer, &self.transaction_hashes)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let major_version = read_varint_u8(reader, "major version")?;
        if major_version < BLOCK_MAJOR_VERSION_1 {
            return Err(Error::serialization(format!(
                "Unsupported block major version {}",
                major_version
            )));
        }

        let minor_version = read_varint_u8(reader, "minor version")?;
        let timestamp = read_varint(reader)?;
        let previous_block_hash = read_hash(reader)?;
        let nonce = read_u32(reader)?;

        let parent_block = if major_version >= BLOCK_MAJOR_VERSION_2 {
            Some(ParentBlock::read_from(reader)?)
        } else {
            None
        };

        let base_transaction = Transaction::read_from(reader)?;
        let transaction_hashes = read_hashes(reader, "transaction hashes")?;

        Ok(Self {
            major_version,
            minor_version,
            timestamp,
            previous_block_hash,
            nonce,
            parent_block,
            base_transaction,
            transaction_hashes,
        })
    }

    /// Decode a complete block blob; trailing bytes are an error
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let block = Self::read_from(&mut cursor)?;

        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(Error::serialization(format!(
                "{} trailing bytes after block",
                bytes.len() - consumed
            )));
        }

        Ok(block)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::serialization(format!("Invalid hex in block blob: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }
}

/// Parameters of one mining attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMiningParameters {
    pub difficulty: u64,
    pub block_template: BlockTemplate,
}

/// Bytes the proof-of-work hash is computed over, with the nonce position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashingBlob {
    bytes: Vec<u8>,
    nonce_offset: usize,
}

impl HashingBlob {
    pub fn new(bytes: Vec<u8>, nonce_offset: usize) -> Result<Self> {
        if nonce_offset + 4 > bytes.len() {
            return Err(Error::serialization(format!(
                "Nonce offset {} outside hashing blob of {} bytes",
                nonce_offset,
                bytes.len()
            )));
        }
        Ok(Self {
            bytes,
            nonce_offset,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn nonce_offset(&self) -> usize {
        self.nonce_offset
    }

    /// Overwrite the nonce in place
    pub fn inject_nonce(&mut self, nonce: u32) {
        self.bytes[self.nonce_offset..self.nonce_offset + 4].copy_from_slice(&nonce.to_le_bytes());
    }
}
