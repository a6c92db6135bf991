mod store;

pub use store::{JsonStore, HOME_ENV, PROJECT_DIR};
