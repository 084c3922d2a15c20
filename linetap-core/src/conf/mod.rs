mod error;
mod settings;
mod units;
mod update;


pub use error::{FieldError, SettingsError, UpdateError};
pub use settings::{
    CaptureSettings, DEFAULT_METRICS_BIND, IntervalSetting, SettingsFile, SizeSetting,
};
pub use units::{parse_interval, parse_size};
pub use update::{ConfigUpdate, Updated};
