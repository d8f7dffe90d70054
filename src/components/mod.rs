pub mod selector;
pub mod tools;
