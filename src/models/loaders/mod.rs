pub mod key_loader;
pub mod unit_loader;

pub use key_loader::{load_api_keys, parse_api_keys};
pub use unit_loader::{load_all_units, load_subject_units};
