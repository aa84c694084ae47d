mod controller;
mod product;
mod state;

pub use controller::StepController;
pub use product::ProductDetector;
pub use state::Action;
