mod segment;

pub use segment::{split_text, DEFAULT_LIMIT};
