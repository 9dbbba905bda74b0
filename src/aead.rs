//! AEAD: AES-GCM content encryption for JWE (128/192/256-bit keys).

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use getrandom::getrandom;
use zeroize::Zeroizing;

use crate::alg::ContentEncryption;
use crate::provider::ProviderError;

type Aes192Gcm = AesGcm<Aes192, U12>;

pub(crate) const IV_BYTES: usize = 12;
pub(crate) const TAG_BYTES: usize = 16;

/// Generate a random 12-byte IV. Used during encryption only.
pub(crate) fn iv() -> Result<[u8; IV_BYTES], ProviderError> {
    let mut n = [0u8; IV_BYTES];
    getrandom(&mut n).map_err(|e| ProviderError::Crypto(e.to_string()))?;
    Ok(n)
}

/// Fresh content encryption key for `enc`.
pub(crate) fn cek(enc: ContentEncryption) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
    let mut key = Zeroizing::new(vec![0u8; enc.key_len()]);
    getrandom(key.as_mut_slice()).map_err(|e| ProviderError::Crypto(e.to_string()))?;
    Ok(key)
}

/// Encrypt; returns `(ciphertext, tag)` as JWE carries them apart.
pub(crate) fn seal(
    enc: ContentEncryption,
    key: &[u8],
    iv: &[u8; IV_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), ProviderError> {
    let mut sealed = match enc {
        ContentEncryption::A128Gcm => seal_with::<Aes128Gcm>(key, iv, plaintext, aad)?,
        ContentEncryption::A192Gcm => seal_with::<Aes192Gcm>(key, iv, plaintext, aad)?,
        ContentEncryption::A256Gcm => seal_with::<Aes256Gcm>(key, iv, plaintext, aad)?,
    };
    let tag = sealed.split_off(sealed.len() - TAG_BYTES);
    Ok((sealed, tag))
}

/// Decrypt and authenticate. All failures collapse into one message.
pub(crate) fn open(
    enc: ContentEncryption,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ProviderError> {
    if iv.len() != IV_BYTES || tag.len() != TAG_BYTES {
        return Err(ProviderError::Crypto("invalid IV or tag length".to_string()));
    }
    let mut joined = Vec::with_capacity(ciphertext.len() + TAG_BYTES);
    joined.extend_from_slice(ciphertext);
    joined.extend_from_slice(tag);
    match enc {
        ContentEncryption::A128Gcm => open_with::<Aes128Gcm>(key, iv, &joined, aad),
        ContentEncryption::A192Gcm => open_with::<Aes192Gcm>(key, iv, &joined, aad),
        ContentEncryption::A256Gcm => open_with::<Aes256Gcm>(key, iv, &joined, aad),
    }
}

fn seal_with<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ProviderError> {
    let cipher = C::new_from_slice(key).map_err(|_| ProviderError::Crypto("invalid content key length".to_string()))?;
    let payload = Payload { msg: plaintext, aad };
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), payload)
        .map_err(|_| ProviderError::Crypto("content encryption failed".to_string()))
}

fn open_with<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ProviderError> {
    let cipher = C::new_from_slice(key).map_err(|_| ProviderError::Crypto("invalid content key length".to_string()))?;
    let payload = Payload { msg: ciphertext, aad };
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), payload)
        .map_err(|_| ProviderError::Crypto("content decryption failed".to_string()))
}
