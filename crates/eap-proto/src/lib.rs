//! EAP Protocol Implementation
//!
//! This crate provides the wire-level pieces of an EAP authenticator as
//! defined in RFC 3748, plus the EAP-AKA method encoding and key hierarchy
//! from RFC 4187.
//!
//! # Features
//!
//! - EAP packet encoding and decoding with strict length checks
//! - EAP-AKA message and attribute (TLV) codec
//! - EAP-AKA key derivation (MK, FIPS 186-2 PRF, K_aut, MSK, EMSK)
//! - AT_MAC calculation and constant-time verification
//!
//! # Example
//!
//! ```rust
//! use eap_proto::{EapCode, EapPacket, EapType};
//!
//! let packet = EapPacket::identity_response(0, "0001010000000001@wlan.mnc001.mcc001.3gppnetwork.org");
//! let bytes = packet.to_bytes().unwrap();
//!
//! let decoded = EapPacket::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded.code, EapCode::Response);
//! assert_eq!(decoded.eap_type, Some(EapType::Identity));
//! ```

pub mod eap;

pub use eap::aka::{AkaAttribute, AkaAttributeType, AkaError, AkaMessage, AkaSubtype};
pub use eap::aka_keys::{compute_mac, verify_mac, AkaKeys};
pub use eap::{EapCode, EapError, EapPacket, EapType};
