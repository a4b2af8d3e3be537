pub mod compliance;
pub mod coverage;
pub mod period;
pub mod pool;
pub mod waterfall;
