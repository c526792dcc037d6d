pub mod cache;
pub mod extract;

pub use cache::{BalanceSnapshotCache, CacheConfig};
pub use extract::{extract_balances, ExtractedBalances};
