//! Envelope encryption for credential delivery
//!
//! The issuer can seal data to a device's RSA public key but cannot open it
//! again. Blob layout before base64:
//!
//! ```text
//! encrypted_dek (modulus size) || nonce (12) || ciphertext || tag (16)
//! ```
//!
//! The DEK is a fresh AES-256 key per envelope, wrapped with RSA-OAEP/SHA-256.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::CryptoError;

const DEK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Smallest device key accepted for sealing
pub const MIN_RSA_BITS: usize = 2048;

/// Seal `payload` to `public_key`, returning the base64 envelope
pub fn seal(payload: &[u8], public_key: &RsaPublicKey) -> Result<String, CryptoError> {
    let mut dek = Zeroizing::new([0u8; DEK_LEN]);
    OsRng.fill_bytes(&mut dek[..]);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = Aes256Gcm::new_from_slice(&dek[..])
        .map_err(|e| CryptoError::Encryption(e.to_string()))
        .and_then(|cipher| {
            cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(e.to_string()))
        });

    let wrapped = ciphertext.and_then(|ct| {
        public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &dek[..])
            .map(|enc_dek| (enc_dek, ct))
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    });

    // The plaintext DEK is not needed past this point
    drop(dek);
    let (enc_dek, ciphertext) = wrapped?;

    let mut blob = Vec::with_capacity(enc_dek.len() + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&enc_dek);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    debug!("Sealed {} byte payload into {} byte envelope", payload.len(), blob.len());
    Ok(STANDARD.encode(blob))
}

/// Load `public_key_text` (PEM or base64 DER), validate it, and seal
pub fn seal_for(payload: &[u8], public_key_text: &str) -> Result<String, CryptoError> {
    let key = load_public_key(public_key_text)?;
    seal(payload, &key)
}

/// Open a base64 envelope with the device private key
pub fn open(envelope: &str, private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let blob = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    open_bytes(&blob, private_key)
}

/// Open a raw (already base64-decoded) envelope
pub fn open_bytes(blob: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let key_len = private_key.size();
    if blob.len() < key_len + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedEnvelope(format!(
            "{} bytes is shorter than the {} byte minimum",
            blob.len(),
            key_len + NONCE_LEN + TAG_LEN
        )));
    }

    let (enc_dek, rest) = blob.split_at(key_len);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let dek = Zeroizing::new(
        private_key
            .decrypt(Oaep::new::<Sha256>(), enc_dek)
            .map_err(|_| CryptoError::Decryption)?,
    );
    if dek.len() != DEK_LEN {
        return Err(CryptoError::Decryption);
    }

    let cipher = Aes256Gcm::new_from_slice(&dek[..]).map_err(|_| CryptoError::Decryption)?;
    drop(dek);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Load an RSA public key from PEM or base64-encoded DER (SubjectPublicKeyInfo)
///
/// Keys below 2048 bits are rejected.
pub fn load_public_key(text: &str) -> Result<RsaPublicKey, CryptoError> {
    let text = text.trim();
    let key = if text.starts_with("-----BEGIN") {
        RsaPublicKey::from_public_key_pem(text)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?
    } else {
        let compact: String = text.split_whitespace().collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|_| CryptoError::KeyFormat("expected PEM or base64 DER".to_string()))?;
        RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?
    };

    let bits = key.size() * 8;
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::KeyFormat(format!(
            "RSA-{} is below the {} bit minimum",
            bits, MIN_RSA_BITS
        )));
    }
    Ok(key)
}

/// True when `text` is an RSA public key this module will seal to
pub fn validate_public_key(text: &str) -> bool {
    load_public_key(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys::{DEVICE_KEY, DEVICE_PUBLIC_PEM, WEAK_PUBLIC_PEM};

    fn device_public() -> RsaPublicKey {
        RsaPublicKey::from(&*DEVICE_KEY)
    }

    #[test]
    fn test_round_trip() {
        let payload = br#"{"session_key":"abcd","atc":1}"#;
        let envelope = seal(payload, &device_public()).unwrap();
        assert_eq!(open(&envelope, &DEVICE_KEY).unwrap(), payload.to_vec());
    }

    #[test]
    fn test_round_trip_empty_and_large() {
        let key = device_public();
        let large: Vec<u8> = (0..12_000).map(|i| (i % 256) as u8).collect();
        for payload in [Vec::new(), large] {
            let envelope = seal(&payload, &key).unwrap();
            assert_eq!(open(&envelope, &DEVICE_KEY).unwrap(), payload);
        }
    }

    #[test]
    fn test_layout() {
        let envelope = seal(b"hello", &device_public()).unwrap();
        let blob = STANDARD.decode(envelope).unwrap();
        assert_eq!(blob.len(), 256 + NONCE_LEN + 5 + TAG_LEN);
    }

    #[test]
    fn test_fresh_dek_per_envelope() {
        let key = device_public();
        assert_ne!(seal(b"same", &key).unwrap(), seal(b"same", &key).unwrap());
    }

    #[test]
    fn test_bit_flip_fails() {
        let blob = STANDARD.decode(seal(b"tamper me please", &device_public()).unwrap()).unwrap();
        let positions = [
            0,
            128,
            255,              // encrypted DEK
            256,
            267,              // nonce
            268,
            275,              // ciphertext
            blob.len() - 16,
            blob.len() - 1,   // tag
        ];
        for pos in positions {
            for bit in [0u8, 7] {
                let mut tampered = blob.clone();
                tampered[pos] ^= 1 << bit;
                assert_eq!(
                    open_bytes(&tampered, &DEVICE_KEY),
                    Err(CryptoError::Decryption),
                    "byte {pos} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn test_truncated_envelope() {
        assert!(matches!(
            open_bytes(&[0u8; 100], &DEVICE_KEY),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(open("%%%", &DEVICE_KEY), Err(CryptoError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_load_public_key_pem_and_der() {
        assert!(load_public_key(DEVICE_PUBLIC_PEM).is_ok());

        let body: String = DEVICE_PUBLIC_PEM
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        let key = load_public_key(&body).unwrap();
        assert_eq!(key, device_public());
    }

    #[test]
    fn test_rejects_weak_and_garbage_keys() {
        assert!(matches!(load_public_key(WEAK_PUBLIC_PEM), Err(CryptoError::KeyFormat(_))));
        assert!(!validate_public_key("not a key"));
        assert!(!validate_public_key(""));
        assert!(validate_public_key(DEVICE_PUBLIC_PEM));
    }

    #[test]
    fn test_seal_for_text_key() {
        let envelope = seal_for(b"payload", DEVICE_PUBLIC_PEM).unwrap();
        assert_eq!(open(&envelope, &DEVICE_KEY).unwrap(), b"payload".to_vec());
        assert!(seal_for(b"payload", WEAK_PUBLIC_PEM).is_err());
    }
}
