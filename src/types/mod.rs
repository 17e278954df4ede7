pub mod command;
pub mod error;
pub mod event;
pub mod geometry;
pub mod plan;
pub mod screen;

pub use command::*;
pub use error::*;
pub use event::*;
pub use geometry::*;
pub use plan::*;
pub use screen::*;
