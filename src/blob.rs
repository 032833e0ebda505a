use super::*;

const NONCE_OFFSET: usize = 39;

/// A block blob or block-template blob with its named nonce slots.
///
/// The four-byte nonce always sits at offset 39, little-endian; its high byte
/// is the nice-hash byte used to partition the nonce space. Template blobs
/// additionally carry up to three template-provided 32-bit slots, written
/// big-endian. A template must be collapsed into its hashing form (see
/// [`cryptonote::convert_blob`]) before a miner can work on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    bytes: Vec<u8>,
    is_template: bool,
    reserved_offset: Option<u32>,
    client_nonce_offset: Option<u32>,
    client_pool_offset: Option<u32>,
}

impl Blob {
    pub fn new(
        bytes: Vec<u8>,
        is_template: bool,
        reserved_offset: Option<u32>,
        client_nonce_offset: Option<u32>,
        client_pool_offset: Option<u32>,
    ) -> Result<Self> {
        ensure!(
            bytes.len() > NONCE_OFFSET + 4,
            "blob of {} bytes has no nonce field",
            bytes.len()
        );
        for offset in [reserved_offset, client_nonce_offset, client_pool_offset]
            .into_iter()
            .flatten()
        {
            ensure!(
                (offset as usize) + 4 <= bytes.len(),
                "field offset {offset} out of range for {} byte blob",
                bytes.len()
            );
        }

        Ok(Self {
            bytes,
            is_template,
            reserved_offset,
            client_nonce_offset,
            client_pool_offset,
        })
    }

    pub fn from_hex(
        blob: &str,
        is_template: bool,
        reserved_offset: Option<u32>,
        client_nonce_offset: Option<u32>,
        client_pool_offset: Option<u32>,
    ) -> Result<Self> {
        Self::new(
            hex::decode(blob).context("invalid blob hex")?,
            is_template,
            reserved_offset,
            client_nonce_offset,
            client_pool_offset,
        )
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    /// Collapses a block template into the blob that is actually hashed.
    pub fn to_hash_blob(&self) -> Result<Blob> {
        if !self.is_template {
            return Ok(self.clone());
        }
        Ok(Self {
            bytes: cryptonote::convert_blob(&self.bytes)?,
            is_template: false,
            reserved_offset: None,
            client_nonce_offset: None,
            client_pool_offset: None,
        })
    }

    pub fn nonce(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[NONCE_OFFSET..])
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        LittleEndian::write_u32(&mut self.bytes[NONCE_OFFSET..NONCE_OFFSET + 4], nonce);
    }

    pub fn nice_hash(&self) -> u8 {
        self.bytes[NONCE_OFFSET]
    }

    pub fn set_nice_hash(&mut self, nice_hash: u8) {
        self.bytes[NONCE_OFFSET] = nice_hash;
    }

    pub fn reserved_offset(&self) -> Option<u32> {
        self.reserved_offset
    }

    pub fn client_nonce_offset(&self) -> Option<u32> {
        self.client_nonce_offset
    }

    pub fn client_pool_offset(&self) -> Option<u32> {
        self.client_pool_offset
    }

    pub fn has_reserved_offset(&self) -> bool {
        self.reserved_offset.is_some()
    }

    pub fn reserved_nonce(&self) -> u32 {
        self.read_big_endian(self.reserved_offset)
    }

    pub fn set_reserved_nonce(&mut self, value: u32) {
        self.write_big_endian(self.reserved_offset, value);
    }

    pub fn has_client_nonce_offset(&self) -> bool {
        self.client_nonce_offset.is_some()
    }

    pub fn client_nonce(&self) -> u32 {
        self.read_big_endian(self.client_nonce_offset)
    }

    pub fn set_client_nonce(&mut self, value: u32) {
        self.write_big_endian(self.client_nonce_offset, value);
    }

    pub fn has_client_pool_offset(&self) -> bool {
        self.client_pool_offset.is_some()
    }

    pub fn client_pool(&self) -> u32 {
        self.read_big_endian(self.client_pool_offset)
    }

    pub fn set_client_pool(&mut self, value: u32) {
        self.write_big_endian(self.client_pool_offset, value);
    }

    fn read_big_endian(&self, offset: Option<u32>) -> u32 {
        match offset {
            Some(offset) => BigEndian::read_u32(&self.bytes[offset as usize..]),
            None => 0,
        }
    }

    fn write_big_endian(&mut self, offset: Option<u32>, value: u32) {
        if let Some(offset) = offset {
            let offset = offset as usize;
            BigEndian::write_u32(&mut self.bytes[offset..offset + 4], value);
        }
    }
}
