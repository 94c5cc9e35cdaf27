pub mod bbox;
pub mod payload;
pub mod predictions;

pub use bbox::{
    generate_bbox_with_jitter, generate_bbox_with_jitter_rng, xywh_to_xyxy, xywh_to_xyxy_in_place,
    Bbox, DEFAULT_CONFIDENCE, DEFAULT_JITTER_RATIO,
};
pub use payload::{format_bbox_payload, parse_bbox_payload};
pub use predictions::read_pred_file;
