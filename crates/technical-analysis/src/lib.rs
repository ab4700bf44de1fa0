pub mod indicator_bank;
pub mod indicators;
pub mod synthesizer;


pub use indicator_bank::*;
pub use indicators::*;
pub use synthesizer::*;
