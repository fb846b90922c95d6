//! Wire codec: JSON message <-> encrypted, length-prefixed frame.
//!
//! A frame is `[tag:1][length:4 BE][ciphertext:length]`. The ciphertext is
//! AES-256-CBC over the PKCS7-padded JSON text, with a key and IV fixed by
//! the device firmware.

use crate::error::{Result, SoundbarError};
use crate::protocol::Message;
use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// Marker byte opening every frame
pub const FRAME_TAG: u8 = 0x10;

/// Tag byte plus the 4-byte length
pub const HEADER_LEN: usize = 5;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

const KEY: &[u8; 32] = b"T^&*J%^7tr~4^%^&I(o%^!jIJ__+a0 k";
const IV: &[u8; 16] = b"'%^Ur7gy$~t+f)%@";

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// Serialize, encrypt and frame a message
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let plaintext =
        serde_json::to_vec(message).map_err(|e| SoundbarError::Encoding(e.to_string()))?;
    let ciphertext = encrypt(&plaintext)?;
    Ok(frame(&ciphertext))
}

/// Decrypt a frame body and parse the message inside it
pub fn decode(ciphertext: &[u8]) -> Result<Message> {
    let plaintext = decrypt(ciphertext)?;
    serde_json::from_slice(&plaintext).map_err(|e| SoundbarError::Decoding(e.to_string()))
}

/// Prepend the frame header to a ciphertext
pub fn frame(ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.push(FRAME_TAG);
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Encrypt plaintext with the protocol key, applying PKCS7 padding
pub fn encrypt(plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = pad(plaintext);
    let len = buffer.len();
    Encryptor::new_from_slices(KEY, IV)
        .map_err(|e| SoundbarError::Encoding(e.to_string()))?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|e| SoundbarError::Encoding(e.to_string()))?;
    Ok(buffer)
}

/// Decrypt a ciphertext with the protocol key and strip PKCS7 padding
pub fn decrypt(ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(SoundbarError::Decoding(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    let mut buffer = ciphertext.to_vec();
    Decryptor::new_from_slices(KEY, IV)
        .map_err(|e| SoundbarError::Decoding(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| SoundbarError::Decoding(e.to_string()))?;

    let len = unpad(&buffer)?;
    buffer.truncate(len);
    Ok(buffer)
}

/// Apply PKCS7 padding. Always adds 1..=BLOCK_SIZE bytes, a full block when
/// the input is already aligned.
pub fn pad(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(plaintext.len() + pad_len);
    out.extend_from_slice(plaintext);
    out.resize(plaintext.len() + pad_len, pad_len as u8);
    out
}

/// Validate PKCS7 padding and return the unpadded length
pub fn unpad(padded: &[u8]) -> Result<usize> {
    let pad_len = *padded
        .last()
        .ok_or_else(|| SoundbarError::Decoding("empty plaintext".to_string()))?
        as usize;

    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > padded.len() {
        return Err(SoundbarError::Decoding(format!(
            "invalid padding length {}",
            pad_len
        )));
    }

    let body_len = padded.len() - pad_len;
    if padded[body_len..].iter().any(|&b| b as usize != pad_len) {
        return Err(SoundbarError::Decoding("inconsistent padding bytes".to_string()));
    }

    Ok(body_len)
}
