pub mod backend;
pub mod orchestrator;
pub mod vulkan_backend;
