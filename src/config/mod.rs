mod settings;

pub use settings::{
    ApiConfig, JwtConfig, LogFormat, LoggingConfig, MonitorConfig, RegistryConfig, ServerConfig,
    Settings,
};
