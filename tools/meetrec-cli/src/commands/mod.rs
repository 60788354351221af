pub mod check;
pub mod config;
pub mod ls;
pub mod record;
