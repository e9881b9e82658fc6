//! Account addresses, signers and the authentication boundary
//!
//! A [`Signer`] proves control over exactly one [`Address`]. The engine never
//! fabricates one on its own: the only way to obtain a signer is through an
//! [`ExecutionContext`], which defers to an external [`Authenticator`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

const ADDRESS_LENGTH: usize = 32;

/// Newtype name an address serializes under. Lets the field-value serializer
/// keep addresses apart from plain strings; every other format sees a string.
pub(crate) const ADDRESS_TOKEN: &str = "$rstore::Address";

/// Opaque 32-byte account identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const ZERO: Address = Address([0; ADDRESS_LENGTH]);
    pub const ONE: Address = Address::from_u64(1);

    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }

    /// Build an address whose low-order bytes hold `value` (big-endian)
    pub const fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        let be = value.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[ADDRESS_LENGTH - 8 + i] = be[i];
            i += 1;
        }
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Full 64-digit hex form, without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse `0x`-prefixed or bare hex with 1 to 64 digits
    pub fn from_hex(text: &str) -> Result<Self> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        if digits.is_empty() || digits.len() > ADDRESS_LENGTH * 2 {
            return Err(Error::Parse(format!(
                "address '{}' must have between 1 and {} hex digits",
                text,
                ADDRESS_LENGTH * 2
            )));
        }
        let padded = format!("{:0>width$}", digits, width = ADDRESS_LENGTH * 2);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| Error::Parse(format!("address '{}': {}", text, e)))?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    /// Short canonical form: leading zeros trimmed, `0x0` for zero
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.to_hex();
        let trimmed = full.trim_start_matches('0');
        if trimmed.is_empty() {
            write!(f, "0x0")
        } else {
            write!(f, "0x{}", trimmed)
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Address::from_hex(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(ADDRESS_TOKEN, &self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(ADDRESS_TOKEN, AddressVisitor)
    }
}

struct AddressVisitor;

impl<'de> serde::de::Visitor<'de> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hex account address")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Address, E> {
        Address::from_hex(v).map_err(E::custom)
    }

    fn visit_newtype_struct<D: serde::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Address, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        Address::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

// ── Signer ────────────────────────────────────────────────

/// Capability proving control of one address.
///
/// Not `Clone` and not constructible outside this crate; pass it by reference.
pub struct Signer {
    address: Address,
}

impl Signer {
    pub(crate) fn new(address: Address) -> Self {
        Signer { address }
    }

    /// The address this signer controls. Stable for the signer's lifetime.
    pub fn address(&self) -> Address {
        self.address
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signer({})", self.address)
    }
}

// ── Authentication Boundary ───────────────────────────────

/// External collaborator that has already verified a caller's credential.
///
/// Returns the single address the credential controls, or `None` when the
/// credential is not accepted.
pub trait Authenticator {
    type Credential: ?Sized;

    fn authenticate(&self, credential: &Self::Credential) -> Option<Address>;
}

/// The only producer of [`Signer`]s
#[derive(Debug, Clone)]
pub struct ExecutionContext<A> {
    authenticator: A,
}

impl<A: Authenticator> ExecutionContext<A> {
    pub fn new(authenticator: A) -> Self {
        ExecutionContext { authenticator }
    }

    /// Produce a signer for the address the credential controls
    pub fn signer_for(&self, credential: &A::Credential) -> Result<Signer> {
        match self.authenticator.authenticate(credential) {
            Some(address) => {
                tracing::debug!(%address, "issued signer");
                Ok(Signer::new(address))
            }
            None => {
                tracing::warn!("authentication refused");
                Err(Error::Unauthenticated)
            }
        }
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }
}

/// Authenticator backed by a fixed table of opaque tokens.
///
/// Intended for embedding tools and tests where credentials were checked
/// upstream and only the token → address binding remains.
#[derive(Debug, Clone, Default)]
pub struct KeyringAuthenticator {
    keys: BTreeMap<String, Address>,
}

impl KeyringAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `address`, replacing any earlier binding
    pub fn with_key(mut self, token: impl Into<String>, address: Address) -> Self {
        self.keys.insert(token.into(), address);
        self
    }
}

impl Authenticator for KeyringAuthenticator {
    type Credential = str;

    fn authenticate(&self, credential: &str) -> Option<Address> {
        self.keys.get(credential).copied()
    }
}
