pub mod deck;
pub mod model;
pub mod parser;
pub mod render;
pub mod synthesis;
pub mod templates;

pub use model::{Citation, Report, Section, UNTITLED};
pub use parser::{parse, parse_strict, ParseError};
