pub mod backend;
pub mod errors;
pub mod factory;
pub mod local;
pub mod task_runner;

pub use factory::AppFactory;
