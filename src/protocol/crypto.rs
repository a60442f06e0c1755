//! Per-peer key exchange and AES-128-ECB wrapping of encrypted packets.
//!
//! The session key's low 64 bits come from a Diffie-Hellman-style exchange
//! with the peer; the high 64 bits are the preshared fixed key
//! (`DEFAULT_KEY` in `device.rs`). Negotiation itself (which opcodes carry
//! the generator/modulus/host-intermediate) lives in `command_session.rs`,
//! which is the only caller that needs to send bytes on the wire; this
//! module only does the arithmetic and the block cipher.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::cipher::block_padding::NoPadding;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::protocol::crc::crc16;

/// Marks an encrypted packet's payload, as opposed to a plaintext one.
pub const STEX: u8 = 0x7E;

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

/// Generator, modulus and host-side random exponent for one key exchange.
/// A fresh set is drawn for every negotiation.
#[derive(Debug, Clone, Copy)]
pub struct KeyExchange {
    pub generator: u64,
    pub modulus: u64,
    pub random: u64,
}

impl KeyExchange {
    /// Draws fresh generator/modulus/random values from `rng`. The modulus
    /// is kept smaller than the generator, mirroring the constraint the
    /// vendor's own key exchange imposes.
    pub fn from_rng(rng: &mut impl RngCore) -> Self {
        let generator = rng.next_u64() | 1;
        let mut modulus = rng.next_u64();
        while modulus >= generator || modulus == 0 {
            modulus = rng.next_u64();
        }
        let random = rng.next_u64();
        Self {
            generator,
            modulus,
            random,
        }
    }

    /// The value sent to the peer as this host's half of the exchange:
    /// `generator ^ random mod modulus`.
    pub fn host_intermediate(&self) -> u64 {
        modpow(self.generator, self.random, self.modulus)
    }

    /// Combines the peer's intermediate value with our own random exponent
    /// to produce the shared secret's low 64 bits.
    pub fn derive_low_bits(&self, peer_intermediate: u64) -> u64 {
        modpow(peer_intermediate, self.random, self.modulus)
    }
}

fn modpow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus <= 1 {
        return 0;
    }
    let modulus = modulus as u128;
    let mut base = base as u128 % modulus;
    let mut result: u128 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base) % modulus;
        }
        exp >>= 1;
        base = (base * base) % modulus;
    }
    result as u64
}

/// Assembles the 128-bit AES key from the preshared fixed key (high 64
/// bits) and the DH-derived secret (low 64 bits).
pub fn session_key(preshared: u64, derived_low: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&derived_low.to_le_bytes());
    key[8..].copy_from_slice(&preshared.to_le_bytes());
    key
}

/// Wraps `data` for peer-scoped counter `counter` into the encrypted
/// packet body (everything after the `STEX` marker byte). `rng` supplies
/// the packing filler.
pub fn wrap(data: &[u8], counter: u32, key: &[u8; 16], rng: &mut impl RngCore) -> Result<Vec<u8>> {
    let len = data.len();
    if len > u8::MAX as usize {
        return Err(Error::Crypto(format!("payload too long to encrypt: {len}")));
    }

    let mut inner = Vec::with_capacity(len + 5);
    inner.push(len as u8);
    inner.extend_from_slice(&counter.to_le_bytes());
    inner.extend_from_slice(data);

    let unpadded_len = inner.len() + 2; // + CRC
    let padded_len = unpadded_len.div_ceil(16) * 16;
    let mut packing = vec![0u8; padded_len - unpadded_len];
    rng.fill_bytes(&mut packing);
    inner.extend_from_slice(&packing);

    let crc = crc16(&inner);
    inner.extend_from_slice(&crc.to_le_bytes());

    let enc = Aes128EcbEnc::new(key.into());
    let ciphertext = enc
        .encrypt_padded_vec_mut::<NoPadding>(&inner);

    let mut out = Vec::with_capacity(1 + ciphertext.len());
    out.push(STEX);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwraps an encrypted packet body (starting with `STEX`), returning the
/// peer's echoed counter and the plaintext command data. A CRC mismatch
/// inside the decrypted region or a counter that doesn't match what the
/// caller expects is a fatal session error that requires renegotiating
/// the key.
pub fn unwrap(encrypted: &[u8], key: &[u8; 16]) -> Result<(u32, Vec<u8>)> {
    let ciphertext = match encrypted.split_first() {
        Some((&marker, rest)) if marker == STEX => rest,
        _ => return Err(Error::Crypto("missing STEX marker".into())),
    };

    let dec = Aes128EcbDec::new(key.into());
    let plaintext = dec
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| Error::Crypto("block decryption failed".into()))?;

    if plaintext.len() < 7 {
        return Err(Error::Truncated {
            expected: 7,
            actual: plaintext.len(),
        });
    }

    let len = plaintext[0] as usize;
    let count = u32::from_le_bytes(plaintext[1..5].try_into().unwrap());
    let data_end = 5 + len;
    if plaintext.len() < data_end + 2 {
        return Err(Error::Truncated {
            expected: data_end + 2,
            actual: plaintext.len(),
        });
    }
    let data = plaintext[5..data_end].to_vec();

    let crc_region_end = plaintext.len() - 2;
    let received_crc = u16::from_le_bytes(
        plaintext[crc_region_end..].try_into().unwrap(),
    );
    let expected_crc = crc16(&plaintext[..crc_region_end]);
    if expected_crc != received_crc {
        return Err(Error::CrcMismatch {
            expected: expected_crc,
            actual: received_crc,
        });
    }

    Ok((count, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn wrap_unwrap_round_trip() {
        let key = session_key(0x0123_4567_0123_4567, 0xDEAD_BEEF_CAFE_F00D);
        let mut rng = StepRng::new(7, 3);
        let counter = 42u32;
        let wrapped = wrap(&[0x07, 0x01, 0x02], counter, &key, &mut rng).unwrap();
        assert_eq!(wrapped[0], STEX);

        let (got_counter, data) = unwrap(&wrapped, &key).unwrap();
        assert_eq!(got_counter, counter);
        assert_eq!(data, vec![0x07, 0x01, 0x02]);
    }

    #[test]
    fn unwrap_rejects_missing_marker() {
        let key = [0u8; 16];
        let err = unwrap(&[0x00, 0x01, 0x02], &key).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn host_intermediate_is_deterministic_for_fixed_inputs() {
        let kex = KeyExchange {
            generator: 11,
            modulus: 7,
            random: 3,
        };
        assert_eq!(kex.host_intermediate(), modpow(11, 3, 7));
    }

    #[test]
    fn session_key_places_preshared_in_high_bytes() {
        let key = session_key(0x1122_3344_5566_7788, 0);
        assert_eq!(&key[8..], &0x1122_3344_5566_7788u64.to_le_bytes());
    }
}
