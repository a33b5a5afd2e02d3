//! Port trait definitions (Hexagonal Architecture)
//!
//! The refinement core drives its external collaborators through these
//! async traits:
//! - JudgeService: scores content against the rubric
//! - FixGenerator: rewrites one section to resolve targeted issues
//! - ContentPipeline: regenerates sections or whole lessons
//! - EntailmentChecker: decides whether a revision resolves an issue
//!
//! Implementations live outside the crate (LLM backends) or in tests.

pub mod content_pipeline;
pub mod entailment;
pub mod fix_generator;
pub mod judge;
pub mod lexical_entailment;

pub use content_pipeline::ContentPipeline;
pub use entailment::EntailmentChecker;
pub use fix_generator::FixGenerator;
pub use judge::JudgeService;
pub use lexical_entailment::LexicalEntailment;
