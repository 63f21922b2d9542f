mod context;
mod errors;
mod factory;

pub use context::{AppContext, Health};
pub use errors::AppError;
pub use factory::AppFactory;
