pub mod answer;
pub mod deploy;
pub mod discovery;
pub mod lock;
pub mod log;
pub mod select;
pub mod settings;
pub mod system;
pub mod wizard;
