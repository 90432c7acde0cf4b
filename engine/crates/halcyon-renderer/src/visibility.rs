pub mod cpu_executor;
pub mod cull_executor;
pub mod gpu_executor;
pub mod pipeline;
