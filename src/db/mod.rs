pub mod comparator;
pub mod key_types;
pub mod options;

pub type Value = Vec<u8>;
