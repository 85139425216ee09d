pub mod identity;
pub mod observability;
pub mod rate_limit;
