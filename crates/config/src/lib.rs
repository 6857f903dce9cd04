mod loader;
mod schema;

pub use self::loader::{load_from_env_or_default, load_from_path};
pub use self::schema::{
    AppConfig, OracleConfig, PublisherConfig, RpcConfig, ScheduleConfig, SystemConfig,
};
