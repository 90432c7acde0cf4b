use halcyon_render_interface::heap_buffer::HeapBufferError;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("scene capacity of {capacity} instances exceeded")]
    CapacityExceeded { capacity: u32 },

    #[error("instance handle is stale")]
    StaleInstance,

    #[error("mesh handle is stale")]
    StaleMesh,

    #[error("mesh is still used by {instances} instances")]
    MeshInUse { instances: u32 },

    #[error("vertex stride {actual} does not match the vertex heap stride {expected}")]
    VertexStrideMismatch { expected: u32, actual: u32 },

    #[error(transparent)]
    Heap(#[from] HeapBufferError),
}
