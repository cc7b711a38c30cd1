//! EAP-AKA message codec (RFC 4187)
//!
//! An EAP-AKA packet carries, after the EAP Type byte:
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Subtype    |           Reserved            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Attr Type     | Attr Length   | Value ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Attribute length counts 4-byte units and includes the type and length
//! bytes. Attributes are kept in wire order so a decoded message encodes
//! back to the same bytes, which AT_MAC verification relies on.

use thiserror::Error;

use super::aka_keys::compute_mac;
use super::{EapCode, EapError, EapPacket, EapType};

/// Offset of the first attribute within the EAP Type-Data
const AKA_HEADER_LEN: usize = 3;

/// Length of RAND, AUTN and MAC values
pub const AKA_VALUE_LEN: usize = 16;

/// Length of AUTS value
pub const AUTS_LEN: usize = 14;

/// EAP-AKA subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AkaSubtype {
    /// AKA-Challenge (1)
    Challenge = 1,
    /// AKA-Authentication-Reject (2)
    AuthenticationReject = 2,
    /// AKA-Synchronization-Failure (4)
    SynchronizationFailure = 4,
    /// AKA-Identity (5)
    Identity = 5,
    /// AKA-Notification (12)
    Notification = 12,
    /// AKA-Reauthentication (13)
    Reauthentication = 13,
    /// AKA-Client-Error (14)
    ClientError = 14,
}

impl AkaSubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AkaSubtype::Challenge),
            2 => Some(AkaSubtype::AuthenticationReject),
            4 => Some(AkaSubtype::SynchronizationFailure),
            5 => Some(AkaSubtype::Identity),
            12 => Some(AkaSubtype::Notification),
            13 => Some(AkaSubtype::Reauthentication),
            14 => Some(AkaSubtype::ClientError),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// EAP-AKA attribute types this codec knows how to interpret
///
/// Attributes outside this set are still decoded and re-encoded raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AkaAttributeType {
    /// AT_RAND (1)
    Rand = 1,
    /// AT_AUTN (2)
    Autn = 2,
    /// AT_RES (3)
    Res = 3,
    /// AT_AUTS (4)
    Auts = 4,
    /// AT_PADDING (6)
    Padding = 6,
    /// AT_PERMANENT_ID_REQ (10)
    PermanentIdReq = 10,
    /// AT_MAC (11)
    Mac = 11,
    /// AT_NOTIFICATION (12)
    Notification = 12,
    /// AT_ANY_ID_REQ (13)
    AnyIdReq = 13,
    /// AT_IDENTITY (14)
    Identity = 14,
    /// AT_FULLAUTH_ID_REQ (17)
    FullauthIdReq = 17,
    /// AT_COUNTER (19)
    Counter = 19,
    /// AT_CLIENT_ERROR_CODE (22)
    ClientErrorCode = 22,
    /// AT_IV (129)
    Iv = 129,
    /// AT_ENCR_DATA (130)
    EncrData = 130,
    /// AT_CHECKCODE (134)
    Checkcode = 134,
    /// AT_RESULT_IND (135)
    ResultInd = 135,
}

impl AkaAttributeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AkaAttributeType::Rand),
            2 => Some(AkaAttributeType::Autn),
            3 => Some(AkaAttributeType::Res),
            4 => Some(AkaAttributeType::Auts),
            6 => Some(AkaAttributeType::Padding),
            10 => Some(AkaAttributeType::PermanentIdReq),
            11 => Some(AkaAttributeType::Mac),
            12 => Some(AkaAttributeType::Notification),
            13 => Some(AkaAttributeType::AnyIdReq),
            14 => Some(AkaAttributeType::Identity),
            17 => Some(AkaAttributeType::FullauthIdReq),
            19 => Some(AkaAttributeType::Counter),
            22 => Some(AkaAttributeType::ClientErrorCode),
            129 => Some(AkaAttributeType::Iv),
            130 => Some(AkaAttributeType::EncrData),
            134 => Some(AkaAttributeType::Checkcode),
            135 => Some(AkaAttributeType::ResultInd),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single EAP-AKA attribute
///
/// `value` holds everything after the type and length bytes, reserved
/// fields and padding included, so its length is always `4 * n - 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaAttribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

impl AkaAttribute {
    /// Build an attribute from a raw value, padding it with zeros to a 4-byte boundary
    pub fn raw(attr_type: u8, value: &[u8]) -> Result<Self, AkaError> {
        let mut value = value.to_vec();
        while (value.len() + 2) % 4 != 0 {
            value.push(0);
        }
        if (value.len() + 2) / 4 > u8::MAX as usize {
            return Err(AkaError::AttributeTooLong(attr_type));
        }
        Ok(AkaAttribute { attr_type, value })
    }

    fn reserved_prefixed(attr_type: AkaAttributeType, data: &[u8]) -> Self {
        let mut value = Vec::with_capacity(2 + data.len());
        value.extend_from_slice(&[0, 0]);
        value.extend_from_slice(data);
        AkaAttribute {
            attr_type: attr_type.as_u8(),
            value,
        }
    }

    /// AT_RAND with the 16-byte random challenge
    pub fn rand(rand: &[u8; AKA_VALUE_LEN]) -> Self {
        Self::reserved_prefixed(AkaAttributeType::Rand, rand)
    }

    /// AT_AUTN with the 16-byte network authentication token
    pub fn autn(autn: &[u8; AKA_VALUE_LEN]) -> Self {
        Self::reserved_prefixed(AkaAttributeType::Autn, autn)
    }

    /// AT_MAC with the given 16-byte MAC
    pub fn mac(mac: &[u8; AKA_VALUE_LEN]) -> Self {
        Self::reserved_prefixed(AkaAttributeType::Mac, mac)
    }

    /// AT_RES, prefixed with the RES length in bits
    pub fn res(res: &[u8]) -> Result<Self, AkaError> {
        if res.len() < 4 || res.len() > 16 {
            return Err(AkaError::InvalidAttribute(AkaAttributeType::Res.as_u8()));
        }
        let mut data = Vec::with_capacity(2 + res.len());
        data.extend_from_slice(&((res.len() * 8) as u16).to_be_bytes());
        data.extend_from_slice(res);
        Self::raw(AkaAttributeType::Res.as_u8(), &data)
    }

    /// AT_AUTS with the 14-byte resynchronization token
    pub fn auts(auts: &[u8; AUTS_LEN]) -> Self {
        AkaAttribute {
            attr_type: AkaAttributeType::Auts.as_u8(),
            value: auts.to_vec(),
        }
    }

    /// AT_IDENTITY, prefixed with the actual identity length
    pub fn identity(identity: &[u8]) -> Result<Self, AkaError> {
        if identity.len() > u16::MAX as usize {
            return Err(AkaError::AttributeTooLong(AkaAttributeType::Identity.as_u8()));
        }
        let mut data = Vec::with_capacity(2 + identity.len());
        data.extend_from_slice(&(identity.len() as u16).to_be_bytes());
        data.extend_from_slice(identity);
        Self::raw(AkaAttributeType::Identity.as_u8(), &data)
    }

    /// AT_CLIENT_ERROR_CODE
    pub fn client_error_code(code: u16) -> Self {
        AkaAttribute {
            attr_type: AkaAttributeType::ClientErrorCode.as_u8(),
            value: code.to_be_bytes().to_vec(),
        }
    }

    /// AT_RESULT_IND
    pub fn result_ind() -> Self {
        Self::reserved_prefixed(AkaAttributeType::ResultInd, &[])
    }

    /// Known attribute type, if any
    pub fn kind(&self) -> Option<AkaAttributeType> {
        AkaAttributeType::from_u8(self.attr_type)
    }

    /// Encoded length in 4-byte units
    pub fn length_units(&self) -> u8 {
        ((self.value.len() + 2) / 4) as u8
    }

    fn fixed_after_reserved(&self) -> Option<[u8; AKA_VALUE_LEN]> {
        if self.value.len() != 2 + AKA_VALUE_LEN {
            return None;
        }
        let mut out = [0u8; AKA_VALUE_LEN];
        out.copy_from_slice(&self.value[2..]);
        Some(out)
    }

    fn length_prefixed(&self, in_bits: bool) -> Option<&[u8]> {
        if self.value.len() < 2 {
            return None;
        }
        let declared = u16::from_be_bytes([self.value[0], self.value[1]]) as usize;
        let len = if in_bits {
            if declared % 8 != 0 {
                return None;
            }
            declared / 8
        } else {
            declared
        };
        self.value.get(2..2 + len)
    }
}

/// A decoded EAP-AKA message (the Type-Data of an EAP packet of type AKA)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaMessage {
    pub subtype: AkaSubtype,
    pub attributes: Vec<AkaAttribute>,
}

impl AkaMessage {
    /// Create an empty message of the given subtype
    pub fn new(subtype: AkaSubtype) -> Self {
        AkaMessage {
            subtype,
            attributes: Vec::new(),
        }
    }

    /// Append an attribute, keeping insertion order
    pub fn with_attribute(mut self, attribute: AkaAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn push(&mut self, attribute: AkaAttribute) {
        self.attributes.push(attribute);
    }

    /// First attribute of the given type
    pub fn get(&self, attr_type: AkaAttributeType) -> Option<&AkaAttribute> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == attr_type.as_u8())
    }

    pub fn rand(&self) -> Option<[u8; AKA_VALUE_LEN]> {
        self.get(AkaAttributeType::Rand)
            .and_then(AkaAttribute::fixed_after_reserved)
    }

    pub fn autn(&self) -> Option<[u8; AKA_VALUE_LEN]> {
        self.get(AkaAttributeType::Autn)
            .and_then(AkaAttribute::fixed_after_reserved)
    }

    pub fn mac(&self) -> Option<[u8; AKA_VALUE_LEN]> {
        self.get(AkaAttributeType::Mac)
            .and_then(AkaAttribute::fixed_after_reserved)
    }

    /// RES value with padding removed
    pub fn res(&self) -> Option<&[u8]> {
        self.get(AkaAttributeType::Res)
            .and_then(|a| a.length_prefixed(true))
    }

    pub fn auts(&self) -> Option<[u8; AUTS_LEN]> {
        let attr = self.get(AkaAttributeType::Auts)?;
        if attr.value.len() != AUTS_LEN {
            return None;
        }
        let mut out = [0u8; AUTS_LEN];
        out.copy_from_slice(&attr.value);
        Some(out)
    }

    pub fn identity(&self) -> Option<&[u8]> {
        self.get(AkaAttributeType::Identity)
            .and_then(|a| a.length_prefixed(false))
    }

    pub fn client_error_code(&self) -> Option<u16> {
        let attr = self.get(AkaAttributeType::ClientErrorCode)?;
        if attr.value.len() != 2 {
            return None;
        }
        Some(u16::from_be_bytes([attr.value[0], attr.value[1]]))
    }

    /// Decode the Type-Data of an EAP-AKA packet
    pub fn decode(data: &[u8]) -> Result<Self, AkaError> {
        if data.len() < AKA_HEADER_LEN {
            return Err(AkaError::TooShort(data.len()));
        }

        let subtype = AkaSubtype::from_u8(data[0]).ok_or(AkaError::UnknownSubtype(data[0]))?;

        let mut attributes = Vec::new();
        for (offset, attr_type, units) in AttributeWalker::new(data) {
            let units = units?;
            let end = offset + units * 4;
            attributes.push(AkaAttribute {
                attr_type,
                value: data[offset + 2..end].to_vec(),
            });
        }

        Ok(AkaMessage {
            subtype,
            attributes,
        })
    }

    /// Decode the EAP-AKA message carried by an EAP packet
    pub fn from_packet(packet: &EapPacket) -> Result<Self, AkaError> {
        if packet.eap_type != Some(EapType::Aka) {
            return Err(AkaError::NotAka);
        }
        Self::decode(&packet.data)
    }

    /// Encode to EAP Type-Data
    pub fn encode(&self) -> Vec<u8> {
        let attrs_len: usize = self.attributes.iter().map(|a| a.value.len() + 2).sum();
        let mut out = Vec::with_capacity(AKA_HEADER_LEN + attrs_len);
        out.push(self.subtype.as_u8());
        out.extend_from_slice(&[0, 0]);
        for attr in &self.attributes {
            out.push(attr.attr_type);
            out.push(attr.length_units());
            out.extend_from_slice(&attr.value);
        }
        out
    }

    /// Wrap into an EAP packet without touching AT_MAC
    pub fn to_packet(&self, code: EapCode, identifier: u8) -> EapPacket {
        EapPacket::new(code, identifier, Some(EapType::Aka), self.encode())
    }

    /// Build the EAP packet with AT_MAC computed under `k_aut`
    ///
    /// An AT_MAC attribute is appended when the message has none. The MAC
    /// covers the whole EAP packet with the MAC value zeroed.
    pub fn seal(
        &self,
        code: EapCode,
        identifier: u8,
        k_aut: &[u8; AKA_VALUE_LEN],
    ) -> Result<EapPacket, AkaError> {
        let mut message = self.clone();
        match message
            .attributes
            .iter_mut()
            .find(|a| a.attr_type == AkaAttributeType::Mac.as_u8())
        {
            Some(attr) => *attr = AkaAttribute::mac(&[0u8; AKA_VALUE_LEN]),
            None => message.push(AkaAttribute::mac(&[0u8; AKA_VALUE_LEN])),
        }

        let zeroed = message.to_packet(code, identifier).to_bytes()?;
        let mac = compute_mac(k_aut, &zeroed);

        for attr in message.attributes.iter_mut() {
            if attr.attr_type == AkaAttributeType::Mac.as_u8() {
                *attr = AkaAttribute::mac(&mac);
            }
        }
        Ok(message.to_packet(code, identifier))
    }
}

/// Byte offset of the AT_MAC value within a full encoded EAP-AKA packet
pub(crate) fn mac_value_offset(packet_bytes: &[u8]) -> Result<Option<usize>, AkaError> {
    // EAP header (4) + Type (1)
    let data_start = 5;
    let data = packet_bytes
        .get(data_start..)
        .ok_or(AkaError::TooShort(packet_bytes.len()))?;
    for (offset, attr_type, units) in AttributeWalker::new(data) {
        let units = units?;
        if attr_type == AkaAttributeType::Mac.as_u8() {
            if units * 4 != 4 + AKA_VALUE_LEN {
                return Err(AkaError::InvalidAttribute(attr_type));
            }
            // skip type, length and reserved
            return Ok(Some(data_start + offset + 4));
        }
    }
    Ok(None)
}

/// Iterates `(offset, type, length units)` over the attributes of an AKA Type-Data
struct AttributeWalker<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> AttributeWalker<'a> {
    fn new(data: &'a [u8]) -> Self {
        AttributeWalker {
            data,
            offset: AKA_HEADER_LEN,
            failed: false,
        }
    }
}

impl Iterator for AttributeWalker<'_> {
    type Item = (usize, u8, Result<usize, AkaError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }
        let offset = self.offset;
        let remaining = self.data.len() - offset;
        if remaining < 2 {
            self.failed = true;
            return Some((offset, self.data[offset], Err(AkaError::Truncated(offset))));
        }

        let attr_type = self.data[offset];
        let units = self.data[offset + 1] as usize;
        if units == 0 {
            self.failed = true;
            return Some((offset, attr_type, Err(AkaError::ZeroLengthAttribute(attr_type))));
        }
        if units * 4 > remaining {
            self.failed = true;
            return Some((offset, attr_type, Err(AkaError::Truncated(offset))));
        }

        self.offset += units * 4;
        Some((offset, attr_type, Ok(units)))
    }
}

/// EAP-AKA codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AkaError {
    #[error("EAP-AKA payload too short: {0} bytes")]
    TooShort(usize),

    #[error("Unknown EAP-AKA subtype: {0}")]
    UnknownSubtype(u8),

    #[error("Zero-length attribute of type {0}")]
    ZeroLengthAttribute(u8),

    #[error("Attribute at offset {0} overruns the payload")]
    Truncated(usize),

    #[error("Malformed attribute of type {0}")]
    InvalidAttribute(u8),

    #[error("Attribute of type {0} too long to encode")]
    AttributeTooLong(u8),

    #[error("Packet does not carry EAP-AKA")]
    NotAka,

    #[error("Missing AT_MAC")]
    MissingMac,

    #[error(transparent)]
    Eap(#[from] EapError),
}
