pub mod dispatcher;
pub mod health;
pub mod repository;

pub use dispatcher::*;
pub use health::*;
pub use repository::*;
