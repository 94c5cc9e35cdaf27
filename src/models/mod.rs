pub mod camera_models;
pub mod detection_models;

pub use camera_models::{LocalCameraRow, RemoteCamera, LEDGER_COLUMNS};
pub use detection_models::Detection;
