pub mod check;
pub mod proxy;
pub mod source;

pub use check::*;
pub use proxy::*;
pub use source::*;
