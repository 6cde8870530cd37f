pub mod course;
pub mod jobs;
pub mod recommendation;

pub use course::*;
pub use jobs::*;
pub use recommendation::*;
