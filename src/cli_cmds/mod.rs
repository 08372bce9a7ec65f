mod cast;
mod daemon;
mod devices;
mod settings;

pub use cast::cmd_cast;
pub use daemon::cmd_run;
pub use devices::cmd_list;
pub use settings::cmd_config;
