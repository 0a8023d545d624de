pub mod config;
pub mod dates;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod pipeline;
pub mod row;
pub mod sniff;
