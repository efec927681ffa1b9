#[path = "../test_helpers.rs"]
mod test_helpers;

pub use test_helpers::*;
