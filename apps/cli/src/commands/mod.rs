//! 命令定义和实现

pub mod actuator;
pub mod drift;
pub mod ports;
pub mod run;
pub mod soak;

pub use actuator::MoveCommand;
pub use drift::DriftCommand;
pub use run::RunCommand;
pub use soak::SoakCommand;
