pub mod bridge;
pub mod emitter;
pub mod format;
pub mod model;
pub mod plot;
