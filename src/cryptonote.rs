use super::*;

/// Collapses a block-template blob into the 76-byte form that gets hashed:
/// the header through the nonce, the transaction tree root, and the
/// transaction count.
///
/// The template carries the full miner transaction plus the identifiers of
/// the mempool transactions, so the conversion has to parse the miner
/// transaction far enough to hash it.
pub fn convert_blob(blob: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(blob);

    // Block header: major, minor, timestamp, previous id, nonce.
    reader.varint().context("block major version")?;
    reader.varint().context("block minor version")?;
    reader.varint().context("block timestamp")?;
    reader.take(32).context("previous block id")?;
    reader.take(4).context("block nonce")?;
    let header_len = reader.position();

    let miner_tx_hash = miner_transaction_hash(&mut reader)?;

    let count = reader.varint().context("transaction count")? as usize;
    let mut hashes = Vec::with_capacity(count + 1);
    hashes.push(miner_tx_hash);
    for _ in 0..count {
        hashes.push(
            reader
                .take(32)
                .context("transaction id")?
                .try_into()
                .unwrap(),
        );
    }
    ensure!(
        reader.is_empty(),
        "{} trailing bytes after block template",
        reader.remaining()
    );

    let mut out = Vec::with_capacity(header_len + 34);
    out.extend_from_slice(&blob[..header_len]);
    out.extend_from_slice(&tree_hash(&hashes));
    write_varint(&mut out, (count + 1) as u64);
    Ok(out)
}

/// Parses the miner transaction in place and returns its hash. Version 1
/// transactions hash whole; version 2 hash as the three-part digest with the
/// ring signature parts empty.
fn miner_transaction_hash(reader: &mut Reader) -> Result<[u8; 32]> {
    let start = reader.position();

    let version = reader.varint().context("miner tx version")?;
    reader.varint().context("miner tx unlock time")?;

    let inputs = reader.varint().context("miner tx input count")?;
    for _ in 0..inputs {
        let tag = reader.byte().context("miner tx input tag")?;
        ensure!(tag == 0xff, "miner tx input tag {tag:#x} is not txin_gen");
        reader.varint().context("miner tx input height")?;
    }

    let outputs = reader.varint().context("miner tx output count")?;
    for _ in 0..outputs {
        reader.varint().context("miner tx output amount")?;
        match reader.byte().context("miner tx output tag")? {
            // txout_to_key
            0x02 => {
                reader.take(32).context("miner tx output key")?;
            }
            // txout_to_tagged_key
            0x03 => {
                reader.take(33).context("miner tx output tagged key")?;
            }
            tag => bail!("unsupported miner tx output tag {tag:#x}"),
        }
    }

    let extra_len = reader.varint().context("miner tx extra length")? as usize;
    reader.take(extra_len).context("miner tx extra")?;
    let prefix_end = reader.position();

    match version {
        1 => Ok(cryptonight::keccak256(reader.slice(start, prefix_end))),
        2 => {
            let rct_type = reader.byte().context("miner tx rct type")?;
            ensure!(rct_type == 0, "miner tx rct type {rct_type} is not null");

            let mut parts = [0u8; 96];
            parts[..32].copy_from_slice(&cryptonight::keccak256(reader.slice(start, prefix_end)));
            parts[32..64].copy_from_slice(&cryptonight::keccak256(&[rct_type]));
            // Prunable hash stays null for the null ring signature type.
            Ok(cryptonight::keccak256(&parts))
        }
        version => bail!("unsupported miner tx version {version}"),
    }
}

/// The cryptonote transaction tree root: pairs hash bottom-up, with the
/// overhang of a non-power-of-two count carried through the first level
/// untouched.
pub fn tree_hash(hashes: &[[u8; 32]]) -> [u8; 32] {
    match hashes {
        [] => [0u8; 32],
        [single] => *single,
        [left, right] => hash_pair(left, right),
        _ => {
            let count = hashes.len();
            let mut cnt = 2;
            while cnt < count {
                cnt <<= 1;
            }
            cnt >>= 1;

            let carried = 2 * cnt - count;
            let mut level: Vec<[u8; 32]> = hashes[..carried].to_vec();
            for pair in hashes[carried..].chunks_exact(2) {
                level.push(hash_pair(&pair[0], &pair[1]));
            }

            while level.len() > 2 {
                level = level
                    .chunks_exact(2)
                    .map(|pair| hash_pair(&pair[0], &pair[1]))
                    .collect();
            }
            hash_pair(&level[0], &level[1])
        }
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut pair = [0u8; 64];
    pair[..32].copy_from_slice(left);
    pair[32..].copy_from_slice(right);
    cryptonight::keccak256(&pair)
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn slice(&self, from: usize, to: usize) -> &'a [u8] {
        &self.bytes[from..to]
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(self.remaining() >= len, "template blob truncated");
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            ensure!(shift < 64, "varint too long");
            let byte = self.byte().context("varint truncated")?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}
