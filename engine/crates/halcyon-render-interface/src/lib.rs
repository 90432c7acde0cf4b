pub mod bindless_registry;
pub mod bindless_table;
pub mod config;
pub mod frame_counter;
pub mod gfx_bindless_sink;
pub mod gfx_heap_storage;
pub mod gpu_types;
pub mod handles;
pub mod heap_allocator;
pub mod heap_buffer;
pub mod pipeline_cache_store;
pub mod pipeline_settings;
