pub mod csp;
pub mod rate_limit;
