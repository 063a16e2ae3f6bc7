pub mod app;
pub mod driver;
pub mod resources;
