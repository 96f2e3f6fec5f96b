pub mod admin;
pub mod rate_limit;
