//! Database access for the API service

pub mod api_log;
pub mod payments;
pub mod profiles;
pub mod prompts;
pub mod results;
pub mod slots;
pub mod wallet;
