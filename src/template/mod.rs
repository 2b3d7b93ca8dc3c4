//! Template rendering: the store-backed function map and the
//! per-destination render pipeline.

mod funcs;
mod renderer;

pub(crate) use funcs::template_env;
pub use renderer::ReapLock;
pub use renderer::Renderer;
