pub mod program;

pub use program::{ProgramSpec, ProgramSpecBuilder};
