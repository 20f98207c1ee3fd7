mod build;
mod check;
mod clean;
mod status;

pub use build::{BuildArgs, cmd_build};
pub use check::cmd_check;
pub use clean::cmd_clean;
pub use status::cmd_status;
