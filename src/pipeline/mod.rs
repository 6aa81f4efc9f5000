//! The document processing pipeline: cleaning, segmentation, form
//! transformation, routing, and the commit lifecycle.

pub mod request;
pub mod router;
pub mod rules;
pub mod segmenter;
pub mod service;
pub mod tokens;
pub mod transform;
pub mod types;

pub use request::{DocForm, IndexRequest, IndexingTechnique, ProcessMode, ProcessRule};
pub use router::{IndexBackend, route};
pub use segmenter::{Segmenter, SegmenterConfig};
pub use service::IndexService;
pub use transform::{FormTransformer, UnitContext};
pub use types::{
    Chunk, IndexEntry, IndexReceipt, IndexUnit, IndexingStatus, ParentRecord, PipelineError,
    QaPair, Stage, ValidationError,
};
