//! CRC16 and AES-128-CBC helpers.
//!
//! Pure functions, no state. The CRC is the reflected CCITT variant the
//! sensors compute (poly 0x1021, seed 0, LSB first), transmitted as a
//! little-endian trailer. AES output always carries its IV in front:
//!
//! ```text
//! ┌──────────┬────────────────────────────┐
//! │ IV (16B) │ ciphertext (N × 16B)       │
//! └──────────┴────────────────────────────┘
//! ```

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use crc::{CRC_16_KERMIT, Crc};

use crate::error::CryptoError;

pub const AES_KEY_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_CBC_IV_SIZE: usize = 16;

pub type AesKey = [u8; AES_KEY_SIZE];

/// Key value meaning "encryption disabled" (erased NV).
pub const DISABLED_KEY: AesKey = [0xFF; AES_KEY_SIZE];

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

// ── CRC ──────────────────────────────────────────────────────

/// CRC16/CCITT over `data`.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Check `data` against the 2-byte little-endian trailer that follows it.
///
/// Returns `(received, computed)` on mismatch.
pub fn verify_crc_trailer(data: &[u8], trailer: [u8; 2]) -> Result<(), (u16, u16)> {
    let received = u16::from_le_bytes(trailer);
    let computed = crc16_ccitt(data);
    if received == computed {
        Ok(())
    } else {
        Err((received, computed))
    }
}

// ── AES-128-CBC ──────────────────────────────────────────────

/// An all-0xFF key means the sensor link runs unencrypted.
pub fn encryption_enabled(key: &AesKey) -> bool {
    key != &DISABLED_KEY
}

/// Encrypt `plain` into `out` as `IV || ciphertext` with a fresh random IV.
///
/// Returns the number of bytes written (`plain.len() + 16`).
pub fn encrypt_cbc(key: &[u8], plain: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
    let iv = random_iv();
    encrypt_cbc_with_iv(key, &iv, plain, out)
}

/// As [`encrypt_cbc`] with a caller-supplied IV.
pub fn encrypt_cbc_with_iv(
    key: &[u8],
    iv: &[u8; AES_CBC_IV_SIZE],
    plain: &[u8],
    out: &mut [u8],
) -> Result<usize, CryptoError> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::BadKeyLength);
    }
    if plain.is_empty() || plain.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::BadLength);
    }
    let total = AES_CBC_IV_SIZE + plain.len();
    if out.len() < total {
        return Err(CryptoError::BufferTooSmall);
    }

    out[..AES_CBC_IV_SIZE].copy_from_slice(iv);
    let cipher =
        Aes128CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::BadKeyLength)?;
    cipher
        .encrypt_padded_b2b_mut::<NoPadding>(plain, &mut out[AES_CBC_IV_SIZE..total])
        .map_err(|_| CryptoError::BufferTooSmall)?;
    Ok(total)
}

/// Decrypt `IV || ciphertext` into `out`.
///
/// Returns the plaintext length (`input.len() - 16`).
pub fn decrypt_cbc(key: &[u8], input: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::BadKeyLength);
    }
    if input.len() <= AES_CBC_IV_SIZE || (input.len() - AES_CBC_IV_SIZE) % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::BadLength);
    }
    let (iv, cipher_text) = input.split_at(AES_CBC_IV_SIZE);
    if out.len() < cipher_text.len() {
        return Err(CryptoError::BufferTooSmall);
    }

    let cipher =
        Aes128CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::BadKeyLength)?;
    let plain = cipher
        .decrypt_padded_b2b_mut::<NoPadding>(cipher_text, &mut out[..cipher_text.len()])
        .map_err(|_| CryptoError::BadLength)?;
    Ok(plain.len())
}

// ── Platform-specific IV generation ──────────────────────────

/// ESP-IDF: hardware RNG via `esp_fill_random`.
#[cfg(target_os = "espidf")]
fn random_iv() -> [u8; AES_CBC_IV_SIZE] {
    let mut iv = [0u8; AES_CBC_IV_SIZE];
    // SAFETY: esp_fill_random writes exactly `len` bytes into the
    // provided, exclusively owned buffer.
    unsafe {
        esp_idf_sys::esp_fill_random(iv.as_mut_ptr().cast(), iv.len());
    }
    iv
}

/// Host: operating-system RNG.
#[cfg(not(target_os = "espidf"))]
fn random_iv() -> [u8; AES_CBC_IV_SIZE] {
    use rand::RngCore;

    let mut iv = [0u8; AES_CBC_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}
