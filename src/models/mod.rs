pub mod alert;
pub mod baseline;
pub mod span;

pub use alert::*;
pub use baseline::*;
pub use span::*;
