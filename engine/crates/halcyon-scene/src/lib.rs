pub mod bounds;
pub mod camera;
pub mod draw_batch;
pub mod error;
pub mod importer;
pub mod mesh;
pub mod scene;
