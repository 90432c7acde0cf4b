pub mod buffer;
pub mod image;
pub mod image_view;
pub mod typed_buffer;
