//! Local DES / 3DES primitives and the legacy retail MAC.
//!
//! The UnionPay POS MAC predates modern algorithms: ISO 9797-1 Algorithm 1
//! with single DES, zero IV and zero padding. It has to match the host
//! bit-for-bit, so everything here is no-padding ECB over explicit blocks.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::{Des, TdesEde3};

use crate::error::{PosError, Result};

const BLOCK: usize = 8;

fn des_cipher(key: &[u8]) -> Result<Des> {
    Des::new_from_slice(key)
        .map_err(|_| PosError::CryptoLength(format!("DES key must be 8 bytes, got {}", key.len())))
}

/// Two-key 3DES key material K1||K2||K1 reconstituted to 24 bytes.
fn tdes_cipher(key: &[u8]) -> Result<TdesEde3> {
    if key.len() != 16 {
        return Err(PosError::CryptoLength(format!(
            "3DES key must be 16 bytes, got {}",
            key.len()
        )));
    }
    let mut key24 = [0u8; 24];
    key24[..16].copy_from_slice(key);
    key24[16..].copy_from_slice(&key[..8]);
    TdesEde3::new_from_slice(&key24)
        .map_err(|_| PosError::CryptoLength("bad 3DES key material".to_string()))
}

fn check_blocks(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() % BLOCK != 0 {
        return Err(PosError::CryptoLength(format!(
            "input must be a positive multiple of 8 bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

/// Single-DES ECB, one 8-byte block, no padding.
pub fn des_ecb_encrypt(block: &[u8], key: &[u8]) -> Result<[u8; 8]> {
    if block.len() != BLOCK {
        return Err(PosError::CryptoLength(format!(
            "DES block must be 8 bytes, got {}",
            block.len()
        )));
    }
    let cipher = des_cipher(key)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(block);
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut out));
    Ok(out)
}

/// Single-DES ECB decryption, one 8-byte block.
pub fn des_ecb_decrypt(block: &[u8], key: &[u8]) -> Result<[u8; 8]> {
    if block.len() != BLOCK {
        return Err(PosError::CryptoLength(format!(
            "DES block must be 8 bytes, got {}",
            block.len()
        )));
    }
    let cipher = des_cipher(key)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(block);
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut out));
    Ok(out)
}

/// Two-key 3DES ECB (EDE, K1||K2||K1), no padding.
pub fn tdes_ecb_encrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    check_blocks(data)?;
    let cipher = tdes_cipher(key)?;
    let mut out = data.to_vec();
    for block in out.chunks_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// Two-key 3DES ECB decryption.
pub fn tdes_ecb_decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    check_blocks(data)?;
    let cipher = tdes_cipher(key)?;
    let mut out = data.to_vec();
    for block in out.chunks_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// ISO 9797-1 Algorithm 1 retail MAC: single DES, zero IV, zero padding.
///
/// `state = DES_enc(state XOR block)` over 8-byte blocks left to right.
/// A message already on a block boundary gets no extra block.
pub fn retail_mac(data: &[u8], key: &[u8]) -> Result<[u8; 8]> {
    let cipher = des_cipher(key)?;
    let mut state = [0u8; 8];
    for block in data.chunks(BLOCK) {
        for (s, b) in state.iter_mut().zip(block) {
            *s ^= b;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut state));
    }
    Ok(state)
}
