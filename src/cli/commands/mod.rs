//! CLI command implementations.

mod config;
mod doctor;
mod results;
mod serve;
mod submit;
mod worker;

pub use config::run_config;
pub use doctor::run_doctor;
pub use results::{run_delete, run_list, run_show};
pub use serve::run_serve;
pub use submit::{run_status, run_submit};
pub use worker::run_worker;
