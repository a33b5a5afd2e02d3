//! Refinement-loop domain models.

pub mod budget;
pub mod content;
pub mod criterion;
pub mod events;
pub mod issue;
pub mod quality_lock;
pub mod recommendation;
pub mod series;
pub mod session;
pub mod similarity;
pub mod verdict;

pub use budget::*;
pub use content::*;
pub use criterion::*;
pub use events::*;
pub use issue::*;
pub use quality_lock::*;
pub use recommendation::*;
pub use session::*;
pub use verdict::*;
