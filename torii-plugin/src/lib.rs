pub mod chain;
pub mod plugin;
pub mod registry;

pub use chain::PluginChain;
pub use plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};
pub use registry::PluginRegistry;
