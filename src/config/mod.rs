mod settings;

pub use settings::{
    FanOutSettings, OtelConfig, RedisConfig, Settings, StoreSettings, SubscriptionsSettings,
};
