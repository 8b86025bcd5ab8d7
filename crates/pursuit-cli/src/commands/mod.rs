pub mod auth_cmd;
pub mod common;
pub mod health;
pub mod refresh;
pub mod report;
pub mod status;
