//! STUN Binding Message Codec (RFC 5389 / RFC 8489 subset)
//!
//! Encodes binding requests and decodes binding responses. Only the pieces a
//! NAT mapping probe needs are modelled: the 20-byte header, raw TLV
//! attributes, and the address-carrying attributes a server returns.
//!
//! The transaction ID is kept as the full 16 bytes that follow the length
//! field (4-byte magic cookie + 12 random bytes). That layout is what RFC 3489
//! servers echo back verbatim as well, so one comparison works for both
//! generations of the protocol.

use crate::error::ProtocolError;
use std::net::{Ipv4Addr, SocketAddrV4};

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Binding request message type
pub const BIND_REQUEST: u16 = 0x0001;

/// Binding success response message type
pub const BIND_RESPONSE: u16 = 0x0101;

/// Address family byte for IPv4
const FAMILY_IPV4: u8 = 0x01;

/// CHANGE-REQUEST flag asking the server to reply from its other port
const CHANGE_PORT_FLAG: u32 = 0x0000_0002;

/// CHANGE-REQUEST flag asking the server to reply from its other IP
const CHANGE_IP_FLAG: u32 = 0x0000_0004;

/// Attribute type codes used by the probe.
pub mod attr {
    /// MAPPED-ADDRESS (legacy, plain address)
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    /// CHANGE-REQUEST (RFC 5780 / RFC 3489)
    pub const CHANGE_REQUEST: u16 = 0x0003;
    /// CHANGED-ADDRESS (RFC 3489 predecessor of OTHER-ADDRESS)
    pub const CHANGED_ADDRESS: u16 = 0x0005;
    /// XOR-MAPPED-ADDRESS (address masked with the magic cookie)
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    /// OTHER-ADDRESS (server's secondary endpoint)
    pub const OTHER_ADDRESS: u16 = 0x802C;
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageClass {
    /// Request message
    Request,
    /// Success response
    SuccessResponse,
    /// Error response
    ErrorResponse,
    /// Indication (no response expected)
    Indication,
}

impl StunMessageClass {
    /// Extract the class bits from a 16-bit message type
    ///
    /// RFC 5389 Section 6 encoding:
    /// ```text
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    #[must_use]
    pub fn from_type(msg_type: u16) -> Self {
        let c0 = (msg_type >> 4) & 0x01;
        let c1 = (msg_type >> 8) & 0x01;
        match c0 | (c1 << 1) {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }
}

/// 16-byte transaction identifier (magic cookie + 96 random bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 16]);

impl TransactionId {
    /// Generate a fresh transaction ID carrying the magic cookie
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        let random: [u8; 12] = rand::random();
        bytes[4..].copy_from_slice(&random);
        Self(bytes)
    }

    /// Wrap raw bytes (as read from the wire)
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes as written to the wire
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// CHANGE-REQUEST flags
///
/// Asks an RFC 5780 server to answer from its alternate IP and/or port. Only
/// meaningful over UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequest {
    /// Reply from the other IP address
    pub change_ip: bool,
    /// Reply from the other port
    pub change_port: bool,
}

impl ChangeRequest {
    /// Plain binding request
    pub const NONE: Self = Self {
        change_ip: false,
        change_port: false,
    };

    /// Reply from the other IP and the other port
    pub const IP_AND_PORT: Self = Self {
        change_ip: true,
        change_port: true,
    };

    /// Reply from the same IP but the other port
    pub const PORT: Self = Self {
        change_ip: false,
        change_port: true,
    };

    /// No change requested
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.change_ip && !self.change_port
    }

    /// Wire representation of the flags
    #[must_use]
    pub const fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.change_ip {
            flags |= CHANGE_IP_FLAG;
        }
        if self.change_port {
            flags |= CHANGE_PORT_FLAG;
        }
        flags
    }

    /// Parse wire flags, ignoring unknown bits
    #[must_use]
    pub const fn from_flags(flags: u32) -> Self {
        Self {
            change_ip: flags & CHANGE_IP_FLAG != 0,
            change_port: flags & CHANGE_PORT_FLAG != 0,
        }
    }

    /// Whether a reply from `from` is the one these flags ask `server` for
    #[must_use]
    pub fn accepts(&self, server: SocketAddrV4, from: SocketAddrV4) -> bool {
        let ip_ok = (from.ip() != server.ip()) == self.change_ip;
        let port_ok = (from.port() != server.port()) == self.change_port;
        ip_ok && port_ok
    }
}

/// Raw STUN attribute (type + unpadded value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    /// Attribute type code
    pub attr_type: u16,
    /// Attribute value without padding
    pub value: Vec<u8>,
}

impl StunAttribute {
    /// Create an attribute from its parts
    #[must_use]
    pub fn new(attr_type: u16, value: Vec<u8>) -> Self {
        Self { attr_type, value }
    }

    /// CHANGE-REQUEST attribute
    #[must_use]
    pub fn change_request(change: ChangeRequest) -> Self {
        Self::new(attr::CHANGE_REQUEST, change.flags().to_be_bytes().to_vec())
    }

    /// MAPPED-ADDRESS attribute
    #[must_use]
    pub fn mapped_address(addr: SocketAddrV4) -> Self {
        Self::new(attr::MAPPED_ADDRESS, encode_address(addr))
    }

    /// XOR-MAPPED-ADDRESS attribute
    #[must_use]
    pub fn xor_mapped_address(addr: SocketAddrV4) -> Self {
        Self::new(attr::XOR_MAPPED_ADDRESS, encode_address(xor_mask(addr)))
    }

    /// OTHER-ADDRESS attribute
    #[must_use]
    pub fn other_address(addr: SocketAddrV4) -> Self {
        Self::new(attr::OTHER_ADDRESS, encode_address(addr))
    }

    /// Encoded size including header and padding
    fn encoded_len(&self) -> usize {
        4 + padded(self.value.len())
    }

    fn encode_into(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.attr_type.to_be_bytes());
        bytes.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.value);

        // Padding to 4-byte boundary
        let padding = padded(self.value.len()) - self.value.len();
        bytes.extend(std::iter::repeat_n(0, padding));
    }

    /// Parse an IPv4 address-valued attribute
    ///
    /// Returns `Ok(None)` for non-IPv4 families.
    fn address(&self) -> Result<Option<SocketAddrV4>, ProtocolError> {
        let truncated = ProtocolError::TruncatedAttribute {
            attr_type: self.attr_type,
        };
        let value = &self.value;
        if value.len() < 4 {
            return Err(truncated);
        }
        if value[1] != FAMILY_IPV4 {
            return Ok(None);
        }
        if value.len() < 8 {
            return Err(truncated);
        }
        let port = u16::from_be_bytes([value[2], value[3]]);
        let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
        Ok(Some(SocketAddrV4::new(ip, port)))
    }
}

/// Apply (or remove) the XOR-MAPPED-ADDRESS mask
///
/// Port is XORed with the high 16 bits of the magic cookie, the IPv4 address
/// with the whole cookie. The operation is its own inverse.
#[must_use]
pub fn xor_mask(addr: SocketAddrV4) -> SocketAddrV4 {
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let ip = u32::from(*addr.ip()) ^ MAGIC_COOKIE;
    SocketAddrV4::new(Ipv4Addr::from(ip), port)
}

fn encode_address(addr: SocketAddrV4) -> Vec<u8> {
    let mut value = Vec::with_capacity(8);
    value.push(0); // Reserved
    value.push(FAMILY_IPV4);
    value.extend_from_slice(&addr.port().to_be_bytes());
    value.extend_from_slice(&addr.ip().octets());
    value
}

const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type (e.g. [`BIND_REQUEST`], [`BIND_RESPONSE`])
    pub msg_type: u16,
    /// Transaction ID, including the magic cookie
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create an empty message
    #[must_use]
    pub fn new(msg_type: u16, transaction_id: TransactionId) -> Self {
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Create a binding request with a fresh transaction ID
    ///
    /// A CHANGE-REQUEST attribute is embedded only when a change is asked for.
    #[must_use]
    pub fn binding_request(change: ChangeRequest) -> Self {
        let mut msg = Self::new(BIND_REQUEST, TransactionId::random());
        if !change.is_empty() {
            msg.add_attribute(StunAttribute::change_request(change));
        }
        msg
    }

    /// Create a binding success response for a given transaction
    #[must_use]
    pub fn binding_response(transaction_id: TransactionId) -> Self {
        Self::new(BIND_RESPONSE, transaction_id)
    }

    /// Add an attribute to the message
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Message class encoded in the type field
    #[must_use]
    pub fn class(&self) -> StunMessageClass {
        StunMessageClass::from_type(self.msg_type)
    }

    /// Encode message to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len: usize = self.attributes.iter().map(StunAttribute::encoded_len).sum();
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload_len);

        bytes.extend_from_slice(&self.msg_type.to_be_bytes());
        bytes.extend_from_slice(&(payload_len as u16).to_be_bytes());
        bytes.extend_from_slice(self.transaction_id.as_bytes());

        for attribute in &self.attributes {
            attribute.encode_into(&mut bytes);
        }

        bytes
    }

    /// Read the declared payload length from a header
    ///
    /// Used by stream transports to know how many bytes follow the header.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::MessageTooShort` if fewer than 4 bytes are given.
    pub fn payload_len(header: &[u8]) -> Result<usize, ProtocolError> {
        if header.len() < 4 {
            return Err(ProtocolError::MessageTooShort { len: header.len() });
        }
        Ok(u16::from_be_bytes([header[2], header[3]]) as usize)
    }

    /// Decode message from bytes
    ///
    /// The declared length must match the bytes that follow the header
    /// exactly; anything else is treated as a corrupt packet.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for short input, a length mismatch, or a
    /// truncated attribute.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let declared = Self::payload_len(bytes)?;
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::MessageTooShort { len: bytes.len() });
        }

        let available = bytes.len() - HEADER_SIZE;
        if declared != available {
            return Err(ProtocolError::LengthMismatch {
                declared,
                available,
            });
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mut transaction_id = [0u8; 16];
        transaction_id.copy_from_slice(&bytes[4..HEADER_SIZE]);

        let mut attributes = Vec::new();
        let mut payload = &bytes[HEADER_SIZE..];

        while !payload.is_empty() {
            if payload.len() < 4 {
                return Err(ProtocolError::MalformedAttributes {
                    remaining: payload.len(),
                });
            }

            let attr_type = u16::from_be_bytes([payload[0], payload[1]]);
            let attr_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
            payload = &payload[4..];

            if attr_len > payload.len() {
                return Err(ProtocolError::TruncatedAttribute { attr_type });
            }

            attributes.push(StunAttribute::new(attr_type, payload[..attr_len].to_vec()));

            // Some servers omit the final padding; tolerate that
            let skip = padded(attr_len).min(payload.len());
            payload = &payload[skip..];
        }

        Ok(Self {
            msg_type,
            transaction_id: TransactionId::from_bytes(transaction_id),
            attributes,
        })
    }

    /// Externally mapped address reported by the server
    ///
    /// Scans the attributes once. XOR-MAPPED-ADDRESS wins over the legacy
    /// MAPPED-ADDRESS when both are present. Non-IPv4 families count as absent.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::TruncatedAttribute` if an address attribute is
    /// too short to parse.
    pub fn mapped_address(&self) -> Result<Option<SocketAddrV4>, ProtocolError> {
        let mut legacy = None;
        for attribute in &self.attributes {
            match attribute.attr_type {
                attr::XOR_MAPPED_ADDRESS => {
                    if let Some(addr) = attribute.address()? {
                        return Ok(Some(xor_mask(addr)));
                    }
                }
                attr::MAPPED_ADDRESS if legacy.is_none() => {
                    legacy = attribute.address()?;
                }
                _ => {}
            }
        }
        Ok(legacy)
    }

    /// Server's secondary endpoint (OTHER-ADDRESS, or CHANGED-ADDRESS)
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::TruncatedAttribute` if an address attribute is
    /// too short to parse.
    pub fn other_address(&self) -> Result<Option<SocketAddrV4>, ProtocolError> {
        let mut legacy = None;
        for attribute in &self.attributes {
            match attribute.attr_type {
                attr::OTHER_ADDRESS => {
                    if let Some(addr) = attribute.address()? {
                        return Ok(Some(addr));
                    }
                }
                attr::CHANGED_ADDRESS if legacy.is_none() => {
                    legacy = attribute.address()?;
                }
                _ => {}
            }
        }
        Ok(legacy)
    }
}
