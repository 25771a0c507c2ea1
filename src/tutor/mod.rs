pub mod feedback;
pub mod image;
pub mod prompt;
pub mod router;

pub use router::{GenerateSolutionResponse, TutorRouter, TutorSettings};
