/// Core chain types for fee estimation
///
/// Addresses, VTHO amounts and transaction clauses as they travel between the
/// wallet and a Thor node.
use crate::errors::{FeeError, FeeResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address of the built-in VTHO (energy) token contract.
pub const VTHO_CONTRACT: &str = "0x0000000000000000000000000000456e65726779";

/// Address of the built-in `Params` contract holding governance values.
pub const PARAMS_CONTRACT: &str = "0x0000000000000000000000000000506172616d73";

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// A 20-byte account or contract address, rendered as lowercase `0x` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const LENGTH: usize = 20;

    pub fn from_bytes(bytes: &[u8]) -> FeeResult<Self> {
        if bytes.len() != Self::LENGTH {
            return Err(FeeError::InvalidAddress(format!(
                "Invalid address length: expected 20 bytes, got {}",
                bytes.len()
            )));
        }

        let mut raw = [0u8; 20];
        raw.copy_from_slice(bytes);
        Ok(Address(raw))
    }

    /// Parse a hex address (0x format)
    pub fn from_hex(hex_address: &str) -> FeeResult<Self> {
        let hex_part = hex_address.strip_prefix("0x").ok_or_else(|| {
            FeeError::InvalidAddress("Hex address must start with '0x'".to_string())
        })?;

        if hex_part.len() != 40 {
            return Err(FeeError::InvalidAddress(format!(
                "Invalid hex address length: expected 42 characters, got {}",
                hex_address.len()
            )));
        }

        let bytes = hex::decode(hex_part)
            .map_err(|_| FeeError::InvalidAddress("Invalid hex in address".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn vtho() -> Self {
        // 20 bytes, right-aligned ASCII "Energy"
        let mut raw = [0u8; 20];
        raw[14..].copy_from_slice(b"Energy");
        Address(raw)
    }

    pub fn params() -> Self {
        let mut raw = [0u8; 20];
        raw[14..].copy_from_slice(b"Params");
        Address(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(&s.to_ascii_lowercase())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a node quantity: `0x`-prefixed hex or a plain decimal string.
pub fn parse_quantity(value: &str) -> FeeResult<u128> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FeeError::InvalidAmount("Quantity cannot be empty".to_string()));
    }

    let parsed = if let Some(stripped) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if stripped.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(stripped, 16)
    } else {
        trimmed.parse::<u128>()
    };

    parsed.map_err(|_| FeeError::InvalidAmount(format!("Not a numeric quantity: {}", value)))
}

/// Minimal `0x` hex form of a quantity.
pub fn to_hex_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

/// `0x` hex form left-padded to a 32-byte word.
pub fn to_hex_word(value: u128) -> String {
    format!("0x{:064x}", value)
}

/// Serde adapter for quantities carried as hex strings on the wire.
pub mod quantity {
    use super::{parse_quantity, to_hex_quantity};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => parse_quantity(&text).map_err(serde::de::Error::custom),
            Raw::Number(number) => Ok(number as u128),
        }
    }
}

/// Serde adapter for `0x` hex byte strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(stripped).map_err(serde::de::Error::custom)
    }
}

/// Represents an amount of VTHO
///
/// Stored in wei (10^-18 VTHO) so every value is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    base_units: u128,
}

impl Amount {
    /// Number of decimal places for VTHO
    pub const DECIMALS: u8 = 18;
    /// Wei per VTHO (10^18)
    pub const UNITS_PER_VTHO: u128 = 1_000_000_000_000_000_000;

    pub const ZERO: Amount = Amount { base_units: 0 };

    pub fn from_wei(base_units: u128) -> Self {
        Amount { base_units }
    }

    /// Create amount from whole VTHO
    pub fn from_vtho(vtho: u128) -> FeeResult<Self> {
        vtho.checked_mul(Self::UNITS_PER_VTHO)
            .map(Self::from_wei)
            .ok_or_else(|| FeeError::InvalidAmount("Amount calculation overflow".to_string()))
    }

    /// Create amount from a decimal VTHO string such as `"12.5"`
    pub fn from_string(amount_str: &str) -> FeeResult<Self> {
        if amount_str.is_empty() {
            return Err(FeeError::InvalidAmount(
                "Amount cannot be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = amount_str.split('.').collect();
        if parts.len() > 2 {
            return Err(FeeError::InvalidAmount(
                "Invalid decimal format".to_string(),
            ));
        }

        let whole_part: u128 = parts[0]
            .parse()
            .map_err(|_| FeeError::InvalidAmount("Invalid number format".to_string()))?;

        let fractional_units = if parts.len() == 2 {
            let fractional_str = parts[1];
            if fractional_str.len() > Self::DECIMALS as usize {
                return Err(FeeError::InvalidAmount(
                    "Too many decimal places".to_string(),
                ));
            }
            if !fractional_str.chars().all(|c| c.is_ascii_digit()) {
                return Err(FeeError::InvalidAmount(
                    "Invalid fractional part".to_string(),
                ));
            }

            let padded = format!("{:0<18}", fractional_str);
            padded
                .parse::<u128>()
                .map_err(|_| FeeError::InvalidAmount("Invalid fractional part".to_string()))?
        } else {
            0
        };

        let total_base_units = whole_part
            .checked_mul(Self::UNITS_PER_VTHO)
            .and_then(|w| w.checked_add(fractional_units))
            .ok_or_else(|| FeeError::InvalidAmount("Amount overflow".to_string()))?;

        Ok(Self::from_wei(total_base_units))
    }

    pub fn wei(&self) -> u128 {
        self.base_units
    }

    /// Full-precision decimal string with trailing zeros trimmed
    pub fn as_string(&self) -> String {
        let whole = self.base_units / Self::UNITS_PER_VTHO;
        let fractional = self.base_units % Self::UNITS_PER_VTHO;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:018}", fractional)
                .trim_end_matches('0')
                .to_string();
            format!("{}.{}", whole, frac_str)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }

    /// Decimal string with exactly `decimals` fractional digits, rounded half-up.
    pub fn to_fixed(self, decimals: u8) -> String {
        let decimals = decimals.min(Self::DECIMALS);
        let scale = 10_u128.pow((Self::DECIMALS - decimals) as u32);
        let half = scale / 2;
        let rounded = self.base_units / scale + u128::from(self.base_units % scale >= half && scale > 1);

        if decimals == 0 {
            return rounded.to_string();
        }

        let divisor = 10_u128.pow(decimals as u32);
        format!(
            "{}.{:0width$}",
            rounded / divisor,
            rounded % divisor,
            width = decimals as usize
        )
    }

    pub fn checked_add(&self, other: &Amount) -> FeeResult<Amount> {
        self.base_units
            .checked_add(other.base_units)
            .map(Amount::from_wei)
            .ok_or_else(|| FeeError::InvalidAmount("Amount overflow in addition".to_string()))
    }

    pub fn checked_sub(&self, other: &Amount) -> FeeResult<Amount> {
        if self.base_units < other.base_units {
            return Err(FeeError::InvalidAmount(
                "Insufficient amount for subtraction".to_string(),
            ));
        }

        Ok(Amount::from_wei(self.base_units - other.base_units))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} VTHO", self.as_string())
    }
}

impl FromStr for Amount {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::from_string(s)
    }
}

// Serialized as a decimal wei string so values above 2^53 survive JSON.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.base_units.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        quantity::deserialize(deserializer).map(Amount::from_wei)
    }
}

/// One operation inside a transaction: recipient, VET value and call data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    /// `None` deploys a contract
    pub to: Option<Address>,
    #[serde(with = "quantity", default)]
    pub value: u128,
    #[serde(with = "hex_bytes", default)]
    pub data: Vec<u8>,
}

impl Clause {
    pub fn transfer_vet(to: Address, value: u128) -> Self {
        Clause {
            to: Some(to),
            value,
            data: Vec::new(),
        }
    }

    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Clause {
            to: Some(to),
            value: 0,
            data,
        }
    }

    pub fn deploy(bytecode: Vec<u8>) -> Self {
        Clause {
            to: None,
            value: 0,
            data: bytecode,
        }
    }

    /// ERC-20 `transfer` of VTHO to `recipient`.
    pub fn transfer_vtho(recipient: Address, amount: Amount) -> Self {
        let mut data = Vec::with_capacity(68);
        data.extend_from_slice(&TRANSFER_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&amount.wei().to_be_bytes());
        Clause::call(Address::vtho(), data)
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Amount moved by this clause if it is a VTHO `transfer`.
    ///
    /// Amounts that do not fit in 128 bits saturate so they can never be
    /// covered by a balance.
    pub fn vtho_transfer_amount(&self) -> Option<Amount> {
        if self.to != Some(Address::vtho()) {
            return None;
        }
        if self.data.len() != 68 || self.data[..4] != TRANSFER_SELECTOR {
            return None;
        }

        let word = &self.data[36..68];
        if word[..16].iter().any(|b| *b != 0) {
            return Some(Amount::from_wei(u128::MAX));
        }

        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        Some(Amount::from_wei(u128::from_be_bytes(low)))
    }
}
