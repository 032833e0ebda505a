//! Keccak-f[1600] sponge as CryptoNight uses it: rate 136, the original
//! Keccak 0x01 padding, and the full 200-byte state exposed to the caller.

const RATE: usize = 136;

pub(crate) fn keccak1600(input: &[u8]) -> [u64; 25] {
    let mut state = [0u64; 25];

    let mut blocks = input.chunks_exact(RATE);
    for block in &mut blocks {
        absorb(&mut state, block);
        ::keccak::f1600(&mut state);
    }

    let remainder = blocks.remainder();
    let mut last = [0u8; RATE];
    last[..remainder.len()].copy_from_slice(remainder);
    last[remainder.len()] = 0x01;
    last[RATE - 1] |= 0x80;
    absorb(&mut state, &last);
    ::keccak::f1600(&mut state);

    state
}

fn absorb(state: &mut [u64; 25], block: &[u8]) {
    for (word, bytes) in state.iter_mut().zip(block.chunks_exact(8)) {
        *word ^= u64::from_le_bytes(bytes.try_into().unwrap());
    }
}

pub(crate) fn state_bytes(state: &[u64; 25]) -> [u8; 200] {
    let mut bytes = [0u8; 200];
    for (chunk, word) in bytes.chunks_exact_mut(8).zip(state) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest256(input: &[u8]) -> String {
        hex::encode(&state_bytes(&keccak1600(input))[..32])
    }

    #[test]
    fn empty_input_matches_keccak256() {
        assert_eq!(
            digest256(b""),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        );
    }

    #[test]
    fn short_input_matches_keccak256() {
        assert_eq!(
            digest256(b"The quick brown fox jumps over the lazy dog"),
            "4d741b6f1eb29cb2a9b9911c82f56fa8d73b04959d3d9d222895df6c0b28aa15",
        );
    }

    #[test]
    fn multi_block_input_absorbs_every_block() {
        // Exactly one rate's worth forces the all-padding trailing block.
        let exact = vec![0xabu8; RATE];
        let longer = vec![0xabu8; RATE + 1];
        assert_ne!(digest256(&exact), digest256(&longer));
        assert_eq!(digest256(&exact), digest256(&exact));
    }
}
