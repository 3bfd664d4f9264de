//! Diffie-Hellman association sessions
//!
//! The relying party sends `g^x mod p`; the provider answers with its own
//! public value and the MAC key XORed with `H(btwoc(shared))`. XOR is its own
//! inverse, so the same `xor_secret` call serves both sides.
//!
//! Public values travel as base64 of their big-endian two's-complement form
//! (`btwoc`): the minimal big-endian bytes with a leading zero byte whenever
//! the high bit would otherwise be set.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use num_bigint::BigUint;
use rand::RngExt;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::association::SessionType;
use crate::error::{Error, Result};

/// OpenID default prime modulus (1024 bits).
const DEFAULT_MODULUS_HEX: &str = "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61E\
F75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D268370557\
7D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E382\
6634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB";

pub const DEFAULT_GENERATOR: u32 = 2;

static DEFAULT_MODULUS: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(DEFAULT_MODULUS_HEX.as_bytes(), 16).expect("static modulus")
});

pub fn default_modulus() -> &'static BigUint {
    &DEFAULT_MODULUS
}

/// One side of a Diffie-Hellman exchange over the default group.
pub struct DiffieHellman {
    private: BigUint,
    public: BigUint,
}

impl DiffieHellman {
    /// Fresh key pair with a random private exponent in `[1, p-1)`.
    pub fn generate() -> Self {
        let modulus = default_modulus();
        let mut bytes = [0u8; 128];
        rand::rng().fill(&mut bytes);
        let bound = modulus.clone() - 2u32;
        let private = BigUint::from_bytes_be(&bytes) % &bound + 1u32;
        let public = BigUint::from(DEFAULT_GENERATOR).modpow(&private, modulus);
        Self { private, public }
    }

    /// Our public value, btwoc + base64, for `dh_consumer_public` /
    /// `dh_server_public`.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(btwoc(&self.public))
    }

    /// `H(btwoc(other^x mod p)) XOR data`, where `H` is the session's hash.
    ///
    /// Recovers the MAC key from `enc_mac_key` on the relying party side and
    /// produces `enc_mac_key` on the provider side.
    pub fn xor_secret(
        &self,
        session: SessionType,
        other_public_base64: &str,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let other = decode_public(other_public_base64)?;
        let modulus = default_modulus();
        if other <= BigUint::from(1u32) || &other >= modulus {
            return Err(Error::ProtocolViolation(
                "Diffie-Hellman public value out of range".into(),
            ));
        }
        let shared = btwoc(&other.modpow(&self.private, modulus));
        let digest = match session {
            SessionType::DhSha1 => Sha1::digest(&shared).to_vec(),
            SessionType::DhSha256 => Sha256::digest(&shared).to_vec(),
            SessionType::NoEncryption => {
                return Err(Error::ProtocolViolation(
                    "no-encryption session has no Diffie-Hellman secret".into(),
                ));
            }
        };
        if digest.len() != data.len() {
            return Err(Error::ProtocolViolation(format!(
                "encrypted MAC key is {} bytes, session hash is {}",
                data.len(),
                digest.len()
            )));
        }
        Ok(digest.iter().zip(data).map(|(a, b)| a ^ b).collect())
    }
}

fn decode_public(encoded: &str) -> Result<BigUint> {
    let bytes = STANDARD.decode(encoded).map_err(|e| {
        Error::ProtocolViolation(format!("Diffie-Hellman public value is not base64: {e}"))
    })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Big-endian two's-complement encoding of a non-negative integer.
pub fn btwoc(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    bytes
}
