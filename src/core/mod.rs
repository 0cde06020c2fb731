pub mod eval;
pub mod locale;
pub mod runtime;
pub mod selector;
pub mod state;
pub mod template;
pub mod variation;
pub mod walker;
