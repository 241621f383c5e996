pub mod job;
pub mod requests;
