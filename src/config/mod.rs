//! Configuration parsing and types.
//!
//! - `types` - the `cloudport.yaml` structure and its validation
//! - `parser` - locating and parsing the file
//! - `duration` - human duration strings ("30s", "10m")

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
