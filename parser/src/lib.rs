mod tree;
mod unquote;

pub use tree::Tree;
pub use unquote::{unquote, unquote_char};
