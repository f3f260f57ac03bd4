//! GT7 packet encryption
//!
//! The game encrypts each UDP packet with Salsa20. The 8-byte nonce is derived
//! from a little-endian u32 stored in the clear at offset 0x40.

use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

/// First four bytes of a decrypted packet ("0S7G" little-endian)
pub const MAGIC: u32 = 0x4737_5330;

const KEY_BYTES: &[u8] = b"Simulator Interface Packet GT7 ver 0.0";
const IV_OFFSET: usize = 0x40;
const IV_XOR: u32 = 0xDEAD_BEAF;

fn apply_keystream(data: &mut [u8], iv1: u32) {
    let iv2 = iv1 ^ IV_XOR;

    let mut nonce = [0u8; 8];
    nonce[0..4].copy_from_slice(&iv2.to_le_bytes());
    nonce[4..8].copy_from_slice(&iv1.to_le_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&KEY_BYTES[..32]);

    let mut cipher = Salsa20::new(&key.into(), &nonce.into());
    cipher.apply_keystream(data);
}

/// Decrypt a raw packet. `None` if it is too short to carry the IV or the
/// magic does not match.
pub fn decrypt_packet(data: &[u8]) -> Option<Vec<u8>> {
    let iv_bytes: [u8; 4] = data.get(IV_OFFSET..IV_OFFSET + 4)?.try_into().ok()?;
    let iv1 = u32::from_le_bytes(iv_bytes);

    let mut out = data.to_vec();
    apply_keystream(&mut out, iv1);

    let magic = u32::from_le_bytes(out.get(0..4)?.try_into().ok()?);
    if magic != MAGIC {
        return None;
    }
    Some(out)
}

/// Encrypt a plaintext packet the way the console does, storing `iv1` at 0x40.
///
/// Used by replay tooling and tests to produce valid wire packets.
pub fn encrypt_packet(plain: &[u8], iv1: u32) -> Vec<u8> {
    let mut out = plain.to_vec();
    apply_keystream(&mut out, iv1);
    if let Some(slot) = out.get_mut(IV_OFFSET..IV_OFFSET + 4) {
        slot.copy_from_slice(&iv1.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plaintext() -> Vec<u8> {
        let mut buf = vec![0u8; 0x128];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[0x3C..0x40].copy_from_slice(&7500.0f32.to_le_bytes());
        buf
    }

    #[test]
    fn test_encrypt_then_decrypt_restores_payload() {
        let plain = plaintext();
        let wire = encrypt_packet(&plain, 0x1234_5678);
        assert_ne!(wire[0..4], plain[0..4]);

        let decrypted = decrypt_packet(&wire).unwrap();
        assert_eq!(decrypted[0..0x40], plain[0..0x40]);
        assert_eq!(decrypted[0x44..], plain[0x44..]);
    }

    #[test]
    fn test_wrong_iv_fails_magic_check() {
        let mut wire = encrypt_packet(&plaintext(), 42);
        wire[0x40] ^= 0xFF;
        assert!(decrypt_packet(&wire).is_none());
    }

    #[test]
    fn test_short_packet_is_rejected() {
        assert!(decrypt_packet(&[0u8; 0x20]).is_none());
    }
}
