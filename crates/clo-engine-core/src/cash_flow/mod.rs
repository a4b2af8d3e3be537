//! Cash-flow aggregation: pool totals per (deal, period) and a filterable asset snapshot.

pub mod aggregator;
pub mod filter;

pub use aggregator::{
    aggregate_pool, run_aggregation, AggregationInput, AggregationRequest, AssetPosition, AssetSnapshot, CashFlowAggregator,
    PoolAggregate, PoolTotals,
};
pub use filter::{AssetField, AssetFilter, FieldKind, FilterOp, FilterValue, Predicate};
