//! Domain workflows, one module per job kind plus artifact deletion.

pub mod affiliate;
pub mod comment;
pub mod deletion;
pub mod post;

pub use affiliate::AffiliateProcessor;
pub use comment::CommentProcessor;
pub use deletion::ArtifactDeleter;
pub use post::PostProcessor;
