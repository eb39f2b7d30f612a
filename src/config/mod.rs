//! Configuration settings, read once from the environment at startup.

mod settings;

pub use settings::Settings;
