// assess-domain library entry point
pub mod assessment;
pub mod error;
pub mod outline;
pub mod section;
pub mod task;
pub mod template;
pub use assessment::Assessment;
pub use error::DomainError;
pub use outline::OutlineNode;
pub use section::{OutlineHistoryRecord, OutlineRecord, Section, SectionHistory};
pub use task::{Task, TaskOp, TaskStatus};
pub use template::{SectionSeed, TemplateKind, TemplateSpec};
