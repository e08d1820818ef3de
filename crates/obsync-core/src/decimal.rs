//! Exact decimal newtypes for book levels.
//!
//! Prices key the level maps and sizes decide deletion, so both stay on
//! `rust_decimal` and never round-trip through floats. A size of exactly
//! zero (in any scale: `0`, `0.0`, `0.000`) removes a level.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Level price. Ordered so it can key a `BTreeMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

/// Resting quantity at a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

macro_rules! decimal_newtype {
    ($ty:ident) => {
        impl $ty {
            pub const ZERO: Self = Self(Decimal::ZERO);

            #[inline]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[inline]
            pub fn inner(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            /// Strictly below zero. `-0` is zero, not negative.
            #[inline]
            pub fn is_negative(&self) -> bool {
                !self.0.is_zero() && self.0.is_sign_negative()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $ty {
            type Err = rust_decimal::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Decimal::from_str(s).map(Self)
            }
        }

        impl From<Decimal> for $ty {
            fn from(value: Decimal) -> Self {
                Self(value)
            }
        }

        impl Add for $ty {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $ty {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }
    };
}

decimal_newtype!(Price);
decimal_newtype!(Size);

impl Price {
    /// Halfway point between `self` and `other`, `None` on overflow.
    #[inline]
    pub fn mid(&self, other: Price) -> Option<Price> {
        self.0.checked_add(other.0)?.checked_div(Decimal::TWO).map(Self)
    }
}
