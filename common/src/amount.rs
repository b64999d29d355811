use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

pub type TokenId = u32;

// Fixed point amount with 8 decimals, "Satoshis"
pub type Amount = i64;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;
pub const MAX_MONEY: Amount = 1_200_000_000 * COIN;

// Scale used for interest and reward accumulators
pub const HIGH_PRECISION_SCALER: u128 = (COIN as u128) * (COIN as u128);

pub const NATIVE_TOKEN: TokenId = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount {0} is out of range")]
    OutOfRange(i128),
    #[error("negative amount {0}")]
    Negative(Amount),
    #[error("amount {requested} is less than {available}")]
    Insufficient {
        token_id: TokenId,
        available: Amount,
        requested: Amount,
    },
    #[error("division by zero")]
    DivisionByZero,
}

pub fn money_range(amount: Amount) -> bool {
    (0..=MAX_MONEY).contains(&amount)
}

#[inline]
fn check(value: i128) -> Result<Amount, AmountError> {
    if value < i64::MIN as i128 || value > i64::MAX as i128 {
        return Err(AmountError::OutOfRange(value));
    }
    Ok(value as Amount)
}

pub fn safe_add(a: Amount, b: Amount) -> Result<Amount, AmountError> {
    check(a as i128 + b as i128)
}

pub fn safe_sub(a: Amount, b: Amount) -> Result<Amount, AmountError> {
    check(a as i128 - b as i128)
}

/// `a * b / c` rounded toward zero, with a 128 bit intermediate.
pub fn mul_div(a: Amount, b: Amount, c: Amount) -> Result<Amount, AmountError> {
    if c == 0 {
        return Err(AmountError::DivisionByZero);
    }
    check(a as i128 * b as i128 / c as i128)
}

/// `a * b / c` rounded up for non-negative operands.
pub fn mul_div_ceil(a: Amount, b: Amount, c: Amount) -> Result<Amount, AmountError> {
    if c == 0 {
        return Err(AmountError::DivisionByZero);
    }
    let num = a as i128 * b as i128;
    let den = c as i128;
    let q = num / den;
    let r = num % den;
    check(if r != 0 && (r > 0) == (den > 0) { q + 1 } else { q })
}

// Product of two 8 decimal values
pub fn multiply_amounts(a: Amount, b: Amount) -> Result<Amount, AmountError> {
    mul_div(a, b, COIN)
}

// Quotient of two 8 decimal values
pub fn divide_amounts(a: Amount, b: Amount) -> Result<Amount, AmountError> {
    mul_div(a, COIN, b)
}

pub fn u256_to_amount(value: U256) -> Result<Amount, AmountError> {
    if value > U256::from(i64::MAX as u64) {
        return Err(AmountError::OutOfRange(i128::MAX));
    }
    Ok(value.low_u64() as Amount)
}

/// Ceil division of a high precision value back into Satoshis.
pub fn ceil_from_high_precision(value: u128) -> Amount {
    let q = value / HIGH_PRECISION_SCALER;
    let r = value % HIGH_PRECISION_SCALER;
    let q = if r > 0 { q + 1 } else { q };
    q.min(i64::MAX as u128) as Amount
}

/// Parse a decimal string like `1.5` or `0.00000001` into Satoshis.
pub fn parse_amount(value: &str) -> Option<Amount> {
    let value = value.trim();
    let (negative, value) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > 8 || !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let int: i128 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut frac: i128 = if frac_part.is_empty() { 0 } else { frac_part.parse().ok()? };
    for _ in frac_part.len()..8 {
        frac *= 10;
    }

    let total = int.checked_mul(COIN as i128)?.checked_add(frac)?;
    let total = if negative { -total } else { total };
    check(total).ok()
}

pub fn format_amount(value: Amount) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = (value as i128).abs();
    format!("{}{}.{:08}", sign, abs / COIN as i128, abs % COIN as i128)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token_id: TokenId,
    pub amount: Amount,
}

impl TokenAmount {
    pub fn new(token_id: TokenId, amount: Amount) -> Self {
        Self { token_id, amount }
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", format_amount(self.amount), self.token_id)
    }
}

impl Serializer for TokenAmount {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.token_id);
        writer.write_i64(self.amount);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            token_id: reader.read_u32()?,
            amount: reader.read_i64()?,
        })
    }

    fn size(&self) -> usize {
        12
    }
}

/// Multi-token balance set. Zero entries are never kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances(BTreeMap<TokenId, Amount>);

impl Balances {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_single(token_id: TokenId, amount: Amount) -> Self {
        let mut balances = Self::new();
        if amount != 0 {
            balances.0.insert(token_id, amount);
        }
        balances
    }

    pub fn get(&self, token_id: TokenId) -> Amount {
        self.0.get(&token_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, Amount)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.0.keys().copied()
    }

    pub fn add(&mut self, value: TokenAmount) -> Result<(), AmountError> {
        if value.amount < 0 {
            return Err(AmountError::Negative(value.amount));
        }
        let current = self.get(value.token_id);
        self.set(value.token_id, safe_add(current, value.amount)?);
        Ok(())
    }

    pub fn sub(&mut self, value: TokenAmount) -> Result<(), AmountError> {
        if value.amount < 0 {
            return Err(AmountError::Negative(value.amount));
        }
        let current = self.get(value.token_id);
        if current < value.amount {
            return Err(AmountError::Insufficient {
                token_id: value.token_id,
                available: current,
                requested: value.amount,
            });
        }
        self.set(value.token_id, current - value.amount);
        Ok(())
    }

    // Signed accumulation, used for history deltas
    pub fn add_signed(&mut self, token_id: TokenId, delta: Amount) -> Result<(), AmountError> {
        let current = self.get(token_id);
        self.set(token_id, safe_add(current, delta)?);
        Ok(())
    }

    pub fn add_all(&mut self, other: &Balances) -> Result<(), AmountError> {
        for (token_id, amount) in other.iter() {
            self.add(TokenAmount::new(token_id, amount))?;
        }
        Ok(())
    }

    pub fn sub_all(&mut self, other: &Balances) -> Result<(), AmountError> {
        for (token_id, amount) in other.iter() {
            self.sub(TokenAmount::new(token_id, amount))?;
        }
        Ok(())
    }

    pub fn set(&mut self, token_id: TokenId, amount: Amount) {
        if amount == 0 {
            self.0.remove(&token_id);
        } else {
            self.0.insert(token_id, amount);
        }
    }

    pub fn total(&self) -> Result<Amount, AmountError> {
        self.0.values().try_fold(0, |acc, v| safe_add(acc, *v))
    }

    pub fn as_map(&self) -> &BTreeMap<TokenId, Amount> {
        &self.0
    }
}

impl From<BTreeMap<TokenId, Amount>> for Balances {
    fn from(map: BTreeMap<TokenId, Amount>) -> Self {
        Self(map.into_iter().filter(|(_, v)| *v != 0).collect())
    }
}

impl FromIterator<(TokenId, Amount)> for Balances {
    fn from_iter<T: IntoIterator<Item = (TokenId, Amount)>>(iter: T) -> Self {
        let map: BTreeMap<TokenId, Amount> = iter.into_iter().collect();
        Self::from(map)
    }
}

impl Serializer for Balances {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let map = BTreeMap::<TokenId, Amount>::read(reader)?;
        if map.values().any(|v| *v == 0) {
            return Err(ReaderError::InvalidValue);
        }
        Ok(Self(map))
    }
}
