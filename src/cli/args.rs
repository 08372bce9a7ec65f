use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dashcast")]
#[command(author = "MrMattias")]
#[command(version)]
#[command(about = "Keeps a cast display on your dashboard whenever it is idle")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Dashboard URL (overrides DASHBOARD_URL)
    #[arg(short, long, global = true)]
    pub(crate) url: Option<String>,

    /// Friendly name or id of the cast device (overrides DISPLAY_NAME)
    #[arg(short, long, global = true)]
    pub(crate) device: Option<String>,

    /// Ignore HDMI-CEC standby/active-input reports from the device
    #[arg(long, global = true)]
    pub(crate) ignore_cec: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub(crate) show_debug: bool,

    /// Path to an alternative config file
    #[arg(short, long, global = true)]
    pub(crate) config: Option<String>,
}

#[derive(Subcommand, Clone, Copy)]
pub(crate) enum Commands {
    /// Watch the device and keep the dashboard up (default)
    Run,
    /// List cast devices on the local network
    List,
    /// Load the dashboard once, replacing whatever is running
    Cast,
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}
