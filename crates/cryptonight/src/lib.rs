//! CryptoNight proof-of-work hashes, software implementation.
//!
//! Covers the classic 2 MiB family, the 1 MiB lite family and the 4 MiB
//! heavy family together with the coin-specific variants of each. The
//! pipeline is the reference one: Keccak absorb, AES-seeded scratchpad
//! explode, the memory-hard mixing loop, scratchpad implode, a final
//! Keccak-f[1600] permutation and one of four finalist hashes selected by
//! the low two bits of the resulting state.
//!
//! Hashing is CPU-bound and takes hundreds of milliseconds for the heavy
//! family; callers that live on an async runtime should run [`hash`] on a
//! blocking thread. The scratchpad is thread-local and reused across calls.

use {
    crate::{
        keccak::{keccak1600, state_bytes},
        soft_aes::{aesenc, aesenc_tube, genkey},
    },
    std::cell::RefCell,
};

mod keccak;
mod soft_aes;

pub const HASH_SIZE: usize = 32;

const MEMORY: usize = 2 * 1024 * 1024;
const MEMORY_LITE: usize = 1024 * 1024;
const MEMORY_HEAVY: usize = 4 * 1024 * 1024;

const MASK: u64 = 0x1F_FFF0;
const MASK_LITE: u64 = 0xF_FFF0;
const MASK_HEAVY: u64 = 0x3F_FFF0;

const ITERATIONS: usize = 0x80000;
const ITERATIONS_HALF: usize = 0x40000;
const ITERATIONS_DOUBLE: usize = 0x100000;

const INDEX_SHIFT: u32 = 3;
const INDEX_SHIFT_XTL: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Cryptonight,
    CryptonightLite,
    CryptonightHeavy,
}

impl Family {
    pub const fn memory(self) -> usize {
        match self {
            Self::Cryptonight => MEMORY,
            Self::CryptonightLite => MEMORY_LITE,
            Self::CryptonightHeavy => MEMORY_HEAVY,
        }
    }

    const fn mask(self) -> u64 {
        match self {
            Self::Cryptonight => MASK,
            Self::CryptonightLite => MASK_LITE,
            Self::CryptonightHeavy => MASK_HEAVY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    #[default]
    Any,
    V0,
    V1,
    V2,
    Tube,
    Alloy,
    Xtl,
    Msr,
    Xhv,
    Rto,
}

/// The knobs that distinguish one variant's inner loop from another's.
#[derive(Debug, Clone, Copy)]
struct LoopSpec {
    iterations: usize,
    mask: u64,
    index_shift: u32,
    tweaked: bool,
    hi_xor_lo: bool,
    heavy: bool,
    haven: bool,
    tube_round: bool,
}

fn loop_spec(family: Family, variant: Variant) -> LoopSpec {
    let base = LoopSpec {
        iterations: ITERATIONS,
        mask: family.mask(),
        index_shift: INDEX_SHIFT,
        tweaked: false,
        hi_xor_lo: false,
        heavy: false,
        haven: false,
        tube_round: false,
    };

    match family {
        Family::Cryptonight => match variant {
            Variant::V1 => LoopSpec {
                tweaked: true,
                ..base
            },
            Variant::Xtl => LoopSpec {
                tweaked: true,
                index_shift: INDEX_SHIFT_XTL,
                ..base
            },
            Variant::Msr => LoopSpec {
                iterations: ITERATIONS_HALF,
                tweaked: true,
                ..base
            },
            Variant::Alloy => LoopSpec {
                iterations: ITERATIONS_DOUBLE,
                ..base
            },
            Variant::Rto => LoopSpec {
                tweaked: true,
                hi_xor_lo: true,
                ..base
            },
            _ => base,
        },
        Family::CryptonightLite => {
            let base = LoopSpec {
                iterations: ITERATIONS_HALF,
                ..base
            };
            match variant {
                Variant::V1 => LoopSpec {
                    tweaked: true,
                    ..base
                },
                Variant::Tube => LoopSpec {
                    tweaked: true,
                    hi_xor_lo: true,
                    ..base
                },
                _ => base,
            }
        }
        Family::CryptonightHeavy => {
            let base = LoopSpec {
                iterations: ITERATIONS_HALF,
                heavy: true,
                ..base
            };
            match variant {
                Variant::Xhv => LoopSpec { haven: true, ..base },
                Variant::Tube => LoopSpec {
                    tweaked: true,
                    hi_xor_lo: true,
                    tube_round: true,
                    ..base
                },
                _ => base,
            }
        }
    }
}

thread_local! {
    static SCRATCHPAD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Hashes `input` with the selected algorithm, reusing this thread's
/// scratchpad.
pub fn hash(family: Family, variant: Variant, input: &[u8]) -> [u8; HASH_SIZE] {
    SCRATCHPAD.with(|scratchpad| {
        let mut scratchpad = scratchpad.borrow_mut();
        let words = family.memory() / 8;
        if scratchpad.len() < words {
            scratchpad.resize(words, 0);
        }
        hash_with(loop_spec(family, variant), input, &mut scratchpad[..words])
    })
}

/// Keccak-256 with the original 0x01 padding, known in cryptonote as
/// `cn_fast_hash`. Used for transaction and tree hashing around the
/// proof-of-work itself.
pub fn keccak256(input: &[u8]) -> [u8; HASH_SIZE] {
    let state = keccak1600(input);
    state_bytes(&state)[..HASH_SIZE].try_into().unwrap()
}

fn hash_with(spec: LoopSpec, input: &[u8], scratchpad: &mut [u64]) -> [u8; HASH_SIZE] {
    assert!(
        !spec.tweaked || input.len() >= 43,
        "tweaked variants need at least 43 input bytes"
    );

    let mut state = keccak1600(input);

    let tweak = if spec.tweaked {
        u64::from_le_bytes(input[35..43].try_into().unwrap()) ^ state[24]
    } else {
        0
    };

    explode(scratchpad, &state, spec.heavy);

    let mut al = state[0] ^ state[4];
    let mut ah = state[1] ^ state[5];
    let mut bl = state[2] ^ state[6];
    let mut bh = state[3] ^ state[7];
    let mut idx = al;

    for _ in 0..spec.iterations {
        let j = ((idx & spec.mask) >> 3) as usize;
        let block = split(scratchpad[j], scratchpad[j + 1]);
        let key = split(al, ah);
        let c = if spec.tube_round {
            aesenc_tube(block, key)
        } else {
            aesenc(block, key)
        };
        let (cl64, ch64) = join(c);

        scratchpad[j] = bl ^ cl64;
        scratchpad[j + 1] = bh ^ ch64;
        if spec.tweaked {
            mangle_byte_11(&mut scratchpad[j + 1], spec.index_shift);
        }

        idx = cl64;
        bl = cl64;
        bh = ch64;

        let j = ((idx & spec.mask) >> 3) as usize;
        let cl = scratchpad[j];
        let ch = scratchpad[j + 1];
        let product = (idx as u128) * (cl as u128);

        al = al.wrapping_add((product >> 64) as u64);
        ah = ah.wrapping_add(product as u64);

        if spec.tweaked {
            ah ^= tweak;
        }
        scratchpad[j] = al;
        scratchpad[j + 1] = ah;
        if spec.tweaked {
            ah ^= tweak;
        }
        if spec.hi_xor_lo {
            scratchpad[j + 1] ^= scratchpad[j];
        }

        ah ^= ch;
        al ^= cl;
        idx = al;

        if spec.heavy {
            let j = ((idx & spec.mask) >> 3) as usize;
            let n = scratchpad[j] as i64;
            let d = scratchpad[j + 1] as u32 as i32;
            let q = n.wrapping_div((d as i64) | 0x5);

            scratchpad[j] = (n ^ q) as u64;
            idx = if spec.haven {
                (((!d) as i64) ^ q) as u64
            } else {
                ((d as i64) ^ q) as u64
            };
        }
    }

    implode(&mut state, scratchpad, spec.heavy);
    ::keccak::f1600(&mut state);

    let state = state_bytes(&state);
    match state[0] & 3 {
        0 => final_blake(&state),
        1 => final_groestl(&state),
        2 => final_jh(&state),
        _ => final_skein(&state),
    }
}

#[inline(always)]
fn split(lo: u64, hi: u64) -> [u32; 4] {
    [lo as u32, (lo >> 32) as u32, hi as u32, (hi >> 32) as u32]
}

#[inline(always)]
fn join(x: [u32; 4]) -> (u64, u64) {
    (
        (x[0] as u64) | ((x[1] as u64) << 32),
        (x[2] as u64) | ((x[3] as u64) << 32),
    )
}

#[inline(always)]
fn mangle_byte_11(word: &mut u64, index_shift: u32) {
    const TABLE: u64 = 0x75310;
    let tmp = (*word >> 24) & 0xff;
    let index = (((tmp >> index_shift) & 6) | (tmp & 1)) << 1;
    *word ^= ((TABLE >> index) & 0x30) << 24;
}

fn seed_bytes(state: &[u64; 25], from_word: usize) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for (chunk, word) in seed.chunks_exact_mut(8).zip(&state[from_word..from_word + 4]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    seed
}

fn load_registers(state: &[u64; 25]) -> [[u32; 4]; 8] {
    let mut x = [[0u32; 4]; 8];
    for (i, block) in x.iter_mut().enumerate() {
        *block = split(state[8 + 2 * i], state[9 + 2 * i]);
    }
    x
}

fn round_all(keys: &[[u32; 4]; 10], x: &mut [[u32; 4]; 8]) {
    for key in keys {
        for block in x.iter_mut() {
            *block = aesenc(*block, *key);
        }
    }
}

fn mix_and_propagate(x: &mut [[u32; 4]; 8]) {
    let old = *x;
    for i in 0..8 {
        for lane in 0..4 {
            x[i][lane] = old[i][lane] ^ old[(i + 1) % 8][lane];
        }
    }
}

/// Fills the scratchpad from the Keccak state. The heavy family front-loads
/// sixteen extra mixing rounds before streaming out.
fn explode(scratchpad: &mut [u64], state: &[u64; 25], heavy: bool) {
    let keys = genkey(&seed_bytes(state, 0));
    let mut x = load_registers(state);

    if heavy {
        for _ in 0..16 {
            round_all(&keys, &mut x);
            mix_and_propagate(&mut x);
        }
    }

    for chunk in scratchpad.chunks_exact_mut(16) {
        round_all(&keys, &mut x);
        for (i, block) in x.iter().enumerate() {
            let (lo, hi) = join(*block);
            chunk[2 * i] = lo;
            chunk[2 * i + 1] = hi;
        }
    }
}

/// Folds the scratchpad back into the Keccak state. The heavy family makes
/// two absorbing passes and sixteen trailing mixing rounds.
fn implode(state: &mut [u64; 25], scratchpad: &[u64], heavy: bool) {
    let keys = genkey(&seed_bytes(state, 4));
    let mut x = load_registers(state);

    let passes = if heavy { 2 } else { 1 };
    for _ in 0..passes {
        for chunk in scratchpad.chunks_exact(16) {
            for (i, block) in x.iter_mut().enumerate() {
                block[0] ^= chunk[2 * i] as u32;
                block[1] ^= (chunk[2 * i] >> 32) as u32;
                block[2] ^= chunk[2 * i + 1] as u32;
                block[3] ^= (chunk[2 * i + 1] >> 32) as u32;
            }
            round_all(&keys, &mut x);
            if heavy {
                mix_and_propagate(&mut x);
            }
        }
    }

    if heavy {
        for _ in 0..16 {
            round_all(&keys, &mut x);
            mix_and_propagate(&mut x);
        }
    }

    for (i, block) in x.iter().enumerate() {
        let (lo, hi) = join(*block);
        state[8 + 2 * i] = lo;
        state[9 + 2 * i] = hi;
    }
}

fn final_blake(state: &[u8]) -> [u8; HASH_SIZE] {
    use blake_hash::Digest;
    let digest = blake_hash::Blake256::digest(state);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

fn final_groestl(state: &[u8]) -> [u8; HASH_SIZE] {
    use groestl::Digest;
    let digest = groestl::Groestl256::digest(state);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

fn final_jh(state: &[u8]) -> [u8; HASH_SIZE] {
    use jh::Digest;
    let digest = jh::Jh256::digest(state);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

fn final_skein(state: &[u8]) -> [u8; HASH_SIZE] {
    use skein::digest::{Digest, consts::U32};
    let digest = skein::Skein512::<U32>::digest(state);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}
