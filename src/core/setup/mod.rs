pub mod options;
pub mod planner;

pub use options::{ServerVersion, SetupOptions};
pub use planner::{
    existing_server_instances, server_command_line_args, server_exists, server_jar, ServerSetup,
};
