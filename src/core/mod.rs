pub mod lifecycle;
pub mod runtime;
pub mod terminal;
