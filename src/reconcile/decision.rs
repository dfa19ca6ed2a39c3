//! Pure transfer arithmetic. All amounts are minor units.

/// Converts a provider-reported major-unit amount to minor units, rounding
/// to the nearest unit.
pub fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

/// Signed amount to move into the pot so it matches the card total.
///
/// Positive deposits into the pot, negative withdraws from it. Differences
/// with a magnitude below `dead_band` are treated as zero.
pub fn compute_transfer_amount(card_total: i64, pot_balance: i64, dead_band: i64) -> i64 {
    let difference = card_total - pot_balance;
    if difference.abs() < dead_band {
        0
    } else {
        difference
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pot already within the dead-band of the card total.
    NoChange { difference: i64 },
    /// A deposit is needed but would take the source account below its
    /// minimum. Deposits are never partially funded.
    InsufficientFunds {
        required: i64,
        available: i64,
        minimum_balance: i64,
    },
    Transfer { amount: i64 },
}

/// Applies the dead-band and the funding guard.
pub fn decide(
    card_total: i64,
    pot_balance: i64,
    main_available: i64,
    minimum_balance: i64,
    dead_band: i64,
) -> Decision {
    let amount = compute_transfer_amount(card_total, pot_balance, dead_band);
    if amount == 0 {
        return Decision::NoChange {
            difference: card_total - pot_balance,
        };
    }

    if amount > 0 && main_available - amount < minimum_balance {
        return Decision::InsufficientFunds {
            required: amount,
            available: main_available,
            minimum_balance,
        };
    }

    Decision::Transfer { amount }
}
