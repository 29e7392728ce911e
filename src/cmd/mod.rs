mod catalog;
mod history;
mod output;
mod process;
mod upload;
mod watch;

pub use catalog::{cmd_classes, cmd_custom_models, cmd_models, cmd_trackers};
pub use history::cmd_history;
pub use process::cmd_process;
pub use upload::cmd_upload_model;
pub use watch::cmd_watch;
