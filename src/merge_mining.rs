//! Transaction extra fields and the merge-mining tag
//!
//! The extra field of a transaction is a sequence of tagged entries. The
//! merge-mining tag commits the parent block's base transaction to the
//! header of the auxiliary block being mined.

use crate::serialization::{read_varint, varint_len, write_varint};
use crate::{Error, Hash, Result};
use std::io::{Cursor, Read};

pub const TX_EXTRA_TAG_PADDING: u8 = 0x00;
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_NONCE: u8 = 0x02;
pub const TX_EXTRA_MERGE_MINING_TAG: u8 = 0x03;

/// Largest padding run accepted in an extra field
const TX_EXTRA_PADDING_MAX_COUNT: usize = 255;

/// Merge-mining commitment: tree depth and merkle root of the auxiliary chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeMiningTag {
    pub depth: u64,
    pub merkle_root: Hash,
}

impl MergeMiningTag {
    /// Tag for a single auxiliary chain committed directly by its header hash
    pub fn new(merkle_root: Hash) -> Self {
        Self {
            depth: 0,
            merkle_root,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(varint_len(self.depth) + Hash::SIZE);
        write_varint(&mut payload, self.depth)?;
        payload.extend_from_slice(self.merkle_root.as_bytes());
        Ok(payload)
    }
}

/// One decoded entry of a transaction extra field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Padding(usize),
    PublicKey(Hash),
    Nonce(Vec<u8>),
    MergeMiningTag(MergeMiningTag),
}

/// Append a serialized merge-mining tag to `extra`
pub fn append_merge_mining_tag(extra: &mut Vec<u8>, tag: &MergeMiningTag) -> Result<()> {
    let payload = tag.payload()?;
    extra.push(TX_EXTRA_MERGE_MINING_TAG);
    write_varint(extra, payload.len() as u64)?;
    extra.extend_from_slice(&payload);
    Ok(())
}

/// Decode every field of an extra blob
pub fn parse_extra(extra: &[u8]) -> Result<Vec<ExtraField>> {
    let mut cursor = Cursor::new(extra);
    let mut fields = Vec::new();

    while (cursor.position() as usize) < extra.len() {
        let mut tag = [0u8; 1];
        cursor.read_exact(&mut tag)?;

        let field = match tag[0] {
            TX_EXTRA_TAG_PADDING => {
                let rest = &extra[cursor.position() as usize..];
                if rest.len() + 1 > TX_EXTRA_PADDING_MAX_COUNT {
                    return Err(Error::serialization("Extra padding is too long"));
                }
                if rest.iter().any(|&b| b != 0) {
                    return Err(Error::serialization("Extra padding contains non-zero bytes"));
                }
                cursor.set_position(extra.len() as u64);
                ExtraField::Padding(rest.len() + 1)
            }
            TX_EXTRA_TAG_PUBKEY => {
                let mut key = [0u8; 32];
                cursor.read_exact(&mut key).map_err(|_| {
                    Error::serialization("Truncated public key in extra")
                })?;
                ExtraField::PublicKey(Hash::new(key))
            }
            TX_EXTRA_NONCE => {
                let mut len = [0u8; 1];
                cursor.read_exact(&mut len)?;
                let mut nonce = vec![0u8; len[0] as usize];
                cursor
                    .read_exact(&mut nonce)
                    .map_err(|_| Error::serialization("Truncated nonce in extra"))?;
                ExtraField::Nonce(nonce)
            }
            TX_EXTRA_MERGE_MINING_TAG => {
                let len = read_varint(&mut cursor)? as usize;
                let start = cursor.position() as usize;
                let payload = extra
                    .get(start..start.saturating_add(len))
                    .ok_or_else(|| Error::serialization("Truncated merge mining tag in extra"))?;

                let mut payload_cursor = Cursor::new(payload);
                let depth = read_varint(&mut payload_cursor)?;
                let root_start = payload_cursor.position() as usize;
                let merkle_root = Hash::from_slice(&payload[root_start..])?;

                cursor.set_position((start + len) as u64);
                ExtraField::MergeMiningTag(MergeMiningTag { depth, merkle_root })
            }
            other => {
                return Err(Error::serialization(format!(
                    "Unknown extra field tag 0x{:02x}",
                    other
                )))
            }
        };

        fields.push(field);
    }

    Ok(fields)
}

/// All merge-mining tags present in `extra`
pub fn merge_mining_tags(extra: &[u8]) -> Result<Vec<MergeMiningTag>> {
    Ok(parse_extra(extra)?
        .into_iter()
        .filter_map(|field| match field {
            ExtraField::MergeMiningTag(tag) => Some(tag),
            _ => None,
        })
        .collect())
}
