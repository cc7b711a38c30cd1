//! EAP (Extensible Authentication Protocol) Support
//!
//! This module implements EAP packet structures as defined in RFC 3748.
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Decoding is strict: the Length field must match the number of bytes
//! handed to the decoder exactly, and unknown codes or method types are
//! rejected rather than carried through.

use thiserror::Error;

pub mod aka;
pub mod aka_keys;

/// Size of the fixed EAP header (code, identifier, length)
pub const EAP_HEADER_LEN: usize = 4;

/// EAP packet code (first byte of EAP packet)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EapCode {
    /// Request packet (Code 1)
    Request = 1,
    /// Response packet (Code 2)
    Response = 2,
    /// Success packet (Code 3)
    Success = 3,
    /// Failure packet (Code 4)
    Failure = 4,
}

impl EapCode {
    /// Convert from u8 to EapCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Request and Response packets carry a Type field, Success and Failure do not
    pub fn has_type(self) -> bool {
        matches!(self, EapCode::Request | EapCode::Response)
    }
}

/// EAP method types (RFC 3748 and IANA registry)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EapType {
    /// Identity (Type 1) - RFC 3748
    Identity = 1,
    /// Notification (Type 2) - RFC 3748
    Notification = 2,
    /// Nak (Type 3) - RFC 3748
    /// Response only, sent in response to unacceptable authentication type
    Nak = 3,
    /// MD5-Challenge (Type 4) - RFC 3748
    Md5Challenge = 4,
    /// EAP-TLS (Type 13) - RFC 5216
    Tls = 13,
    /// EAP-SIM (Type 18) - RFC 4186
    Sim = 18,
    /// EAP-TTLS (Type 21) - RFC 5281
    Ttls = 21,
    /// EAP-AKA (Type 23) - RFC 4187
    Aka = 23,
    /// PEAP (Type 25)
    Peap = 25,
    /// EAP-MSCHAPv2 (Type 26)
    MsChapV2 = 26,
    /// EAP-AKA' (Type 50) - RFC 5448
    AkaPrime = 50,
}

impl EapType {
    /// Convert from u8 to EapType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapType::Identity),
            2 => Some(EapType::Notification),
            3 => Some(EapType::Nak),
            4 => Some(EapType::Md5Challenge),
            13 => Some(EapType::Tls),
            18 => Some(EapType::Sim),
            21 => Some(EapType::Ttls),
            23 => Some(EapType::Aka),
            25 => Some(EapType::Peap),
            26 => Some(EapType::MsChapV2),
            50 => Some(EapType::AkaPrime),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Identity, Notification and Nak are not authentication methods
    pub fn is_method(self) -> bool {
        !matches!(self, EapType::Identity | EapType::Notification | EapType::Nak)
    }
}

impl std::fmt::Display for EapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EapType::Identity => "Identity",
            EapType::Notification => "Notification",
            EapType::Nak => "Nak",
            EapType::Md5Challenge => "MD5-Challenge",
            EapType::Tls => "EAP-TLS",
            EapType::Sim => "EAP-SIM",
            EapType::Ttls => "EAP-TTLS",
            EapType::Aka => "EAP-AKA",
            EapType::Peap => "PEAP",
            EapType::MsChapV2 => "EAP-MSCHAPv2",
            EapType::AkaPrime => "EAP-AKA'",
        };
        f.write_str(name)
    }
}

/// EAP packet structure
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    /// EAP code (Request, Response, Success, Failure)
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// EAP type (only present for Request/Response)
    pub eap_type: Option<EapType>,
    /// Type-specific data
    pub data: Vec<u8>,
}

impl EapPacket {
    /// Create a new EAP packet
    pub fn new(code: EapCode, identifier: u8, eap_type: Option<EapType>, data: Vec<u8>) -> Self {
        EapPacket {
            code,
            identifier,
            eap_type,
            data,
        }
    }

    /// Create an EAP Request of the given method type
    pub fn request(identifier: u8, eap_type: EapType, data: Vec<u8>) -> Self {
        EapPacket::new(EapCode::Request, identifier, Some(eap_type), data)
    }

    /// Create an EAP Response of the given method type
    pub fn response(identifier: u8, eap_type: EapType, data: Vec<u8>) -> Self {
        EapPacket::new(EapCode::Response, identifier, Some(eap_type), data)
    }

    /// Create an EAP Identity Response
    pub fn identity_response(identifier: u8, identity: &str) -> Self {
        EapPacket::response(identifier, EapType::Identity, identity.as_bytes().to_vec())
    }

    /// Create an EAP Nak Response listing the desired method types
    pub fn nak(identifier: u8, desired: &[EapType]) -> Self {
        EapPacket::response(
            identifier,
            EapType::Nak,
            desired.iter().map(|t| t.as_u8()).collect(),
        )
    }

    /// Create an EAP Success packet
    pub fn success(identifier: u8) -> Self {
        EapPacket::new(EapCode::Success, identifier, None, Vec::new())
    }

    /// Create an EAP Failure packet
    pub fn failure(identifier: u8) -> Self {
        EapPacket::new(EapCode::Failure, identifier, None, Vec::new())
    }

    /// Whether this packet is a Response carrying the given type
    pub fn is_response_of(&self, eap_type: EapType) -> bool {
        self.code == EapCode::Response && self.eap_type == Some(eap_type)
    }

    /// Parse EAP packet from bytes
    ///
    /// # Packet Format
    /// - Code (1 byte)
    /// - Identifier (1 byte)
    /// - Length (2 bytes, network byte order)
    /// - Type (1 byte, only for Request/Response)
    /// - Type-Data (variable)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EapError> {
        if bytes.len() < EAP_HEADER_LEN {
            return Err(EapError::PacketTooShort {
                expected: EAP_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let code = EapCode::from_u8(bytes[0]).ok_or(EapError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        if length != bytes.len() {
            return Err(EapError::LengthMismatch {
                declared: length,
                actual: bytes.len(),
            });
        }

        if !code.has_type() {
            // Success and Failure are header-only
            if length != EAP_HEADER_LEN {
                return Err(EapError::InvalidLength(length));
            }
            return Ok(EapPacket::new(code, identifier, None, Vec::new()));
        }

        if length < EAP_HEADER_LEN + 1 {
            return Err(EapError::MissingType);
        }
        let type_byte = bytes[EAP_HEADER_LEN];
        let eap_type = EapType::from_u8(type_byte).ok_or(EapError::UnknownType(type_byte))?;

        Ok(EapPacket {
            code,
            identifier,
            eap_type: Some(eap_type),
            data: bytes[EAP_HEADER_LEN + 1..].to_vec(),
        })
    }

    /// Encode EAP packet to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, EapError> {
        let length = self.length()?;

        let mut bytes = Vec::with_capacity(length);
        bytes.push(self.code.as_u8());
        bytes.push(self.identifier);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());

        if self.code.has_type() {
            let eap_type = self.eap_type.ok_or(EapError::MissingType)?;
            bytes.push(eap_type.as_u8());
            bytes.extend_from_slice(&self.data);
        }

        Ok(bytes)
    }

    /// Get the total encoded length of the packet
    pub fn length(&self) -> Result<usize, EapError> {
        let length = if self.code.has_type() {
            EAP_HEADER_LEN + 1 + self.data.len()
        } else {
            EAP_HEADER_LEN
        };
        if length > u16::MAX as usize {
            return Err(EapError::PacketTooLong(length));
        }
        Ok(length)
    }
}

/// EAP-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Length field says {declared} bytes but packet has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),

    #[error("Unknown EAP type: {0}")]
    UnknownType(u8),

    #[error("Request/Response packet without a Type field")]
    MissingType,

    #[error("Packet too long: {0} bytes")]
    PacketTooLong(usize),
}

impl EapError {
    /// The bytes on the wire were not a valid EAP packet
    ///
    /// `PacketTooLong` only arises when encoding.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, EapError::PacketTooLong(_))
    }
}
