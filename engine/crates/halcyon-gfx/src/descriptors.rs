pub mod bindless_layout;
pub mod descriptor_pool;
