pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_settings, CliOverrides};
pub use settings::{
    PromptFlags, RoleBehaviors, RoleBindingConfig, RoleSpec, Settings, TimeoutPolicy,
    DEFAULT_SETTINGS_FILE_NAME,
};
