//! EAP-AKA key hierarchy (RFC 4187 Section 7)
//!
//! ```text
//! MK = SHA1(Identity | IK | CK)
//! K_encr | K_aut | MSK | EMSK = PRF(MK)
//! ```
//!
//! PRF is the FIPS 186-2 pseudo-random generator (change notice 1, without
//! the mod q step) with G built from the raw SHA-1 compression function.

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use super::aka::{mac_value_offset, AkaError, AKA_VALUE_LEN};
use super::EapPacket;

type HmacSha1 = Hmac<Sha1>;

const SHA1_INIT: [u32; 5] = [0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0];

/// Total key material drawn from the PRF: K_encr + K_aut + MSK + EMSK
const KEY_MATERIAL_LEN: usize = 16 + 16 + 64 + 64;

/// Keys derived for one EAP-AKA full authentication
#[derive(Clone, PartialEq, Eq)]
pub struct AkaKeys {
    pub mk: [u8; 20],
    pub k_encr: [u8; 16],
    pub k_aut: [u8; 16],
    pub msk: [u8; 64],
    pub emsk: [u8; 64],
}

impl std::fmt::Debug for AkaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AkaKeys").finish_non_exhaustive()
    }
}

impl AkaKeys {
    /// Derive the key hierarchy from the peer identity and the CK/IK of the vector
    pub fn derive(identity: &[u8], ik: &[u8], ck: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(identity);
        hasher.update(ik);
        hasher.update(ck);
        let mut mk = [0u8; 20];
        mk.copy_from_slice(&hasher.finalize());

        let material = fips186_prf(&mk);

        let mut keys = AkaKeys {
            mk,
            k_encr: [0u8; 16],
            k_aut: [0u8; 16],
            msk: [0u8; 64],
            emsk: [0u8; 64],
        };
        keys.k_encr.copy_from_slice(&material[0..16]);
        keys.k_aut.copy_from_slice(&material[16..32]);
        keys.msk.copy_from_slice(&material[32..96]);
        keys.emsk.copy_from_slice(&material[96..160]);
        keys
    }
}

/// FIPS 186-2 change notice 1 generator seeded with `mk`
fn fips186_prf(mk: &[u8; 20]) -> [u8; KEY_MATERIAL_LEN] {
    let mut xkey = *mk;
    let mut out = [0u8; KEY_MATERIAL_LEN];

    for chunk in out.chunks_mut(20) {
        let w = g_function(&xkey);
        chunk.copy_from_slice(&w);
        add_one_plus(&mut xkey, &w);
    }
    out
}

/// G(t, XVAL): one SHA-1 compression of XVAL zero-padded to 64 bytes
fn g_function(xval: &[u8; 20]) -> [u8; 20] {
    let mut block = [0u8; 64];
    block[..20].copy_from_slice(xval);

    let mut state = SHA1_INIT;
    sha1::compress(&mut state, &[block.into()]);

    let mut out = [0u8; 20];
    for (dst, word) in out.chunks_mut(4).zip(state.iter()) {
        dst.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// XKEY = (1 + XKEY + w) mod 2^160
fn add_one_plus(xkey: &mut [u8; 20], w: &[u8; 20]) {
    let mut carry: u16 = 1;
    for i in (0..20).rev() {
        let sum = xkey[i] as u16 + w[i] as u16 + carry;
        xkey[i] = sum as u8;
        carry = sum >> 8;
    }
}

/// AT_MAC value: first 16 bytes of HMAC-SHA1-128 over the packet with a zeroed MAC
pub fn compute_mac(k_aut: &[u8; AKA_VALUE_LEN], packet_bytes: &[u8]) -> [u8; AKA_VALUE_LEN] {
    // HMAC zero-pads keys shorter than the block size, so this is the same key
    let mut key = [0u8; 64];
    key[..AKA_VALUE_LEN].copy_from_slice(k_aut);
    let mut mac = <HmacSha1 as Mac>::new(&key.into());
    mac.update(packet_bytes);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; AKA_VALUE_LEN];
    out.copy_from_slice(&digest[..AKA_VALUE_LEN]);
    out
}

/// Check the AT_MAC of an EAP-AKA packet under `k_aut`
///
/// Returns `Ok(false)` when the MAC does not match and `MissingMac` when the
/// packet carries none. The comparison runs in constant time.
pub fn verify_mac(packet: &EapPacket, k_aut: &[u8; AKA_VALUE_LEN]) -> Result<bool, AkaError> {
    let mut bytes = packet.to_bytes()?;
    let offset = mac_value_offset(&bytes)?.ok_or(AkaError::MissingMac)?;

    let mut received = [0u8; AKA_VALUE_LEN];
    received.copy_from_slice(&bytes[offset..offset + AKA_VALUE_LEN]);
    bytes[offset..offset + AKA_VALUE_LEN].fill(0);

    let expected = compute_mac(k_aut, &bytes);
    Ok(bool::from(expected.ct_eq(&received)))
}
