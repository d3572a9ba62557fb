pub mod call;
pub mod job;
pub mod verification;
