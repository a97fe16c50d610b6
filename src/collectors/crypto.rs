use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, Result};
use md5::{Digest, Md5};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

/// OpenSSL `EVP_BytesToKey` with MD5, one iteration and no salt.
fn derive_key_and_iv(passphrase: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut derived: Vec<u8> = Vec::with_capacity(KEY_LENGTH + IV_LENGTH + 16);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < KEY_LENGTH + IV_LENGTH {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }
    let iv = derived[KEY_LENGTH..KEY_LENGTH + IV_LENGTH].to_vec();
    derived.truncate(KEY_LENGTH);
    (derived, iv)
}

/// Decrypts an AES-256-CBC agent package (without its version prefix).
pub fn decrypt_package(encrypted: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let (key, iv) = derive_key_and_iv(passphrase.as_bytes());
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| anyhow!("Invalid key length: {}", e))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
        .map_err(|_| anyhow!("Invalid padding or data length"))
}
