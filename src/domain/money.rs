use crate::error::MarketError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A running account balance, fixed to 2 decimal places.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific
/// rules and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// A strictly positive monetary amount, normalized to 2 decimal places on
/// construction. Used for escrowed payments, fees, payouts and refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, MarketError> {
        let value = value.round_dp(2);
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(MarketError::Config(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// What remains of this amount after retaining `rate` of it, rounded to
    /// 2 decimal places. Used for both the commission on a payout and the
    /// penalty on a refund. Returns `None` when nothing remains.
    pub fn net_of(&self, rate: Decimal) -> Option<Amount> {
        let net = (self.0 * (Decimal::ONE - rate)).round_dp(2);
        (net > Decimal::ZERO).then_some(Self(net))
    }

    /// This amount plus a non-negative surcharge, e.g. the posting fee.
    pub fn plus_fee(&self, fee: Decimal) -> Result<Amount, MarketError> {
        Self::new(self.0 + fee)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MarketError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.value()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(5.0));
        assert_eq!(b1 + b2, Balance::new(dec!(15.0)));
        assert_eq!(b1 - b2, Balance::new(dec!(5.0)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(MarketError::Config(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(MarketError::Config(_))
        ));
    }

    #[test]
    fn test_amount_rounds_to_two_places() {
        let a = Amount::new(dec!(10.005)).unwrap();
        assert_eq!(a.value(), dec!(10.00));
        // Sub-cent values round away to nothing
        assert!(Amount::new(dec!(0.004)).is_err());
    }

    #[test]
    fn test_net_of_commission() {
        let payment = Amount::new(dec!(200)).unwrap();
        let payout = payment.net_of(dec!(0.05)).unwrap();
        assert_eq!(payout.value(), dec!(190.00));
    }

    #[test]
    fn test_net_of_penalty() {
        let payment = Amount::new(dec!(200)).unwrap();
        let refund = payment.net_of(dec!(0.25)).unwrap();
        assert_eq!(refund.value(), dec!(150.00));
    }

    #[test]
    fn test_net_of_full_rate_is_nothing() {
        let payment = Amount::new(dec!(200)).unwrap();
        assert!(payment.net_of(dec!(1)).is_none());
    }

    #[test]
    fn test_plus_fee() {
        let payment = Amount::new(dec!(200)).unwrap();
        assert_eq!(payment.plus_fee(dec!(50)).unwrap().value(), dec!(250.00));
    }

    #[test]
    fn test_balance_covers() {
        let b = Balance::new(dec!(100));
        assert!(b.covers(Amount::new(dec!(100)).unwrap()));
        assert!(!b.covers(Amount::new(dec!(100.01)).unwrap()));
    }
}
