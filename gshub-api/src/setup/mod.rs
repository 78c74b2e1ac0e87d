// Setup and initialization modules
pub mod migrations;
pub mod seeding;

pub use migrations::run_migrations;
pub use seeding::{ensure_dev_admin, maybe_seed_catalog, seed_memory_store};
