pub mod dispatcher;
pub mod engine;
pub mod state;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use engine::AlertEngine;
