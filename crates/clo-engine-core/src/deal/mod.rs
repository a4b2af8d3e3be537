//! Deal data model: deal terms, tranches, collateral assets, cash accounts.

pub mod account;
pub mod asset;
pub mod rating;
pub mod structure;
pub mod tranche;

pub use account::{AccountBalance, AccountKind, AccountLedger, AccountRow};
pub use asset::{Asset, AssetType, CashFlowPeriod, CouponType, Seniority};
pub use structure::{Deal, DealStatus, PaymentFrequency};
pub use tranche::{CouponTerms, DayCount, Tranche};
