pub mod attachment_pipeline;
pub mod error_collector_layer;
pub mod model_client;
pub mod title_generator;

pub use attachment_pipeline::{
    AttachmentMode, AttachmentRejection, MaterializeOutcome, PrepareOutcome, RawFile, RejectReason,
    materialize, prepare,
};
pub use error_collector_layer::ErrorCollectorLayer;
pub use model_client::{ModelClient, ModelDescriptor, ResponseStream, StreamChunk};
pub use title_generator::{fallback_title, generate_title};
