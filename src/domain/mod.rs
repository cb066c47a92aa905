mod annotation;
mod armor_id;
mod block;
mod job;
mod job_file;
mod job_settings;
mod job_status;
mod result_record;
mod tree_node;

pub use annotation::{AnnotatedBlock, AnnotationDocument, AnnotationPage, ANNOTATION_VERSION};
pub use armor_id::{is_armor_format, levenshtein, normalize_id, ARMOR_ID_LEN};
pub use block::{Block, BlockType, ShapeType};
pub use job::{EngineKind, Job, JobId};
pub use job_file::{JobFile, JobFileType};
pub use job_settings::JobSettings;
pub use job_status::{InvalidTransition, JobEvent, JobStatus};
pub use result_record::{OcrOutcome, ResultRecord};
pub use tree_node::{NodeFile, TreeNode};
