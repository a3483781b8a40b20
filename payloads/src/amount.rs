use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A non-negative monetary quantity expressed in an integer minor unit
/// (e.g. cents), bounded at `10^15` so that the leaderboard score
/// (`amount * 10^13 + remainder`) fits in an `i128` without overflow.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "use-sqlx", sqlx(transparent))]
pub struct Amount(pub i64);

pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000; // 10^15

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn is_valid(self) -> bool {
        self.0 > 0 && self.0 <= MAX_AMOUNT
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Add a signed delta (may shrink the amount), used by freezeForBid.
    pub fn apply_delta(self, delta: i64) -> Option<Amount> {
        self.0.checked_add(delta).map(Amount)
    }
}

impl From<i64> for Amount {
    fn from(v: i64) -> Self {
        Amount(v)
    }
}
