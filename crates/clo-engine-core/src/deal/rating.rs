//! Rating scales and Moody's rating factors.
//!
//! Accepts Moody's (`Aaa`, `B2`, `Caa1`) and S&P/Fitch (`AAA`, `B`, `CCC+`) notation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Moody's rating factor for WARF. Unknown ratings map to the worst factor.
pub fn rating_factor(rating: &str) -> Decimal {
    match rating.trim() {
        "Aaa" | "AAA" => dec!(1),
        "Aa1" | "AA+" => dec!(10),
        "Aa2" | "AA" => dec!(20),
        "Aa3" | "AA-" => dec!(40),
        "A1" | "A+" => dec!(70),
        "A2" | "A" => dec!(120),
        "A3" | "A-" => dec!(180),
        "Baa1" | "BBB+" => dec!(260),
        "Baa2" | "BBB" => dec!(360),
        "Baa3" | "BBB-" => dec!(610),
        "Ba1" | "BB+" => dec!(940),
        "Ba2" | "BB" => dec!(1350),
        "Ba3" | "BB-" => dec!(1766),
        "B1" | "B+" => dec!(2220),
        "B2" | "B" => dec!(2720),
        "B3" | "B-" => dec!(3490),
        "Caa1" | "CCC+" => dec!(4770),
        "Caa2" | "CCC" => dec!(6500),
        "Caa3" | "CCC-" => dec!(8070),
        _ => dec!(10000),
    }
}

/// Whether a rating falls in the CCC/Caa bucket or below.
pub fn is_ccc_or_below(rating: &str) -> bool {
    rating_factor(rating) >= dec!(4770)
}
