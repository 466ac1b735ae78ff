pub mod args;

mod file;
pub use file::{
    Config, ConfigFileError, ConfigFileResult, DATA_PATH_DEFAULT, KEEP_ALIVE_DEFAULT,
    LISTEN_ADDRESSES_DEFAULT, ServerState, SrvConfig, TasksConfig, UnrecognizedKeys,
    UnrecognizedValues, parse_config, read_config,
};
